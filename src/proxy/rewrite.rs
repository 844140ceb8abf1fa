use std::borrow::Cow;

use regex::bytes::{NoExpand, Regex};

/// Rewrites the first bracketed address literal naming the target port,
/// e.g. `[fe80::1]:7245`, to `127.0.0.1:7245`.
///
/// Matching is per chunk: a literal split across two reads passes through
/// untouched, and only the first occurrence in a chunk is replaced. The
/// pattern is byte-oriented so non-UTF-8 payload around the literal never
/// prevents a match.
pub struct HostRewriter {
    pattern: Regex,
    replacement: Vec<u8>,
}

impl HostRewriter {
    pub fn new(target_port: u16) -> Self {
        let pattern = Regex::new(&format!(r"\[[^\]]*\]:{target_port}"))
            .expect("address pattern compiles for any port");
        Self {
            pattern,
            replacement: format!("127.0.0.1:{target_port}").into_bytes(),
        }
    }

    /// Returns the chunk with the first match replaced, or the chunk
    /// unchanged when the pattern does not appear.
    pub fn rewrite<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        self.pattern.replace(chunk, NoExpand(&self.replacement))
    }
}
