use std::io::{self, ErrorKind, Read};

use mio::{Interest, Registry};
use tracing::{debug, warn};

use crate::proxy::pair::ConnectionPair;
use crate::proxy::rewrite::HostRewriter;

/// Size of one relay read.
const CHUNK_SIZE: usize = 4096;

/// Which side of the pair a readiness event belongs to: the tag names the
/// direction whose source is the ready socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

/// Whether the pair survived the readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Open,
    TearDown,
}

/// Handles one readiness event for the socket tagged with `dir`.
///
/// Write readiness drains the pending queue destined for that socket; read
/// readiness relays chunks to the opposite socket, rewriting client-side
/// chunks only. Under mio's edge-triggered poll the read path drains the
/// socket until it would block.
pub fn on_ready(
    pair: &mut ConnectionPair,
    dir: Direction,
    readable: bool,
    writable: bool,
    rewriter: &HostRewriter,
    registry: &Registry,
) -> RelayStatus {
    if pair.is_closed() {
        return RelayStatus::TearDown;
    }

    if writable {
        if let Err(e) = flush_ready(pair, dir, registry) {
            warn!(peer = %pair.peer, error = %e, "relay write failed");
            return RelayStatus::TearDown;
        }
    }

    if readable {
        return read_ready(pair, dir, rewriter, registry);
    }

    RelayStatus::Open
}

/// Continues delivery into the socket that became writable.
fn flush_ready(pair: &mut ConnectionPair, dir: Direction, registry: &Registry) -> io::Result<()> {
    match dir {
        Direction::ClientToUpstream => {
            pair.to_client.flush(&mut pair.client)?;
            sync_client_interest(pair, registry)
        }
        Direction::UpstreamToClient => {
            pair.to_upstream.flush(&mut pair.upstream)?;
            sync_upstream_interest(pair, registry)
        }
    }
}

fn read_ready(
    pair: &mut ConnectionPair,
    dir: Direction,
    rewriter: &HostRewriter,
    registry: &Registry,
) -> RelayStatus {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let read = match dir {
            Direction::ClientToUpstream => pair.client.read(&mut buf),
            Direction::UpstreamToClient => pair.upstream.read(&mut buf),
        };
        match read {
            Ok(0) => {
                debug!(peer = %pair.peer, "peer closed");
                return RelayStatus::TearDown;
            }
            Ok(n) => {
                if let Err(e) = forward(pair, dir, &buf[..n], rewriter, registry) {
                    warn!(peer = %pair.peer, error = %e, "relay write failed");
                    return RelayStatus::TearDown;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return RelayStatus::Open,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                ) =>
            {
                debug!(peer = %pair.peer, "connection lost");
                return RelayStatus::TearDown;
            }
            Err(e) => {
                warn!(peer = %pair.peer, error = %e, "relay read failed");
                return RelayStatus::TearDown;
            }
        }
    }
}

/// Sends one chunk toward its destination, rewriting only on the way
/// upstream, and keeps the destination's write interest in sync with its
/// queue.
fn forward(
    pair: &mut ConnectionPair,
    dir: Direction,
    chunk: &[u8],
    rewriter: &HostRewriter,
    registry: &Registry,
) -> io::Result<()> {
    match dir {
        Direction::ClientToUpstream => {
            let data = rewriter.rewrite(chunk);
            debug!(peer = %pair.peer, bytes = data.len(), "client -> upstream");
            pair.to_upstream.send(&mut pair.upstream, &data)?;
            sync_upstream_interest(pair, registry)
        }
        Direction::UpstreamToClient => {
            debug!(peer = %pair.peer, bytes = chunk.len(), "upstream -> client");
            pair.to_client.send(&mut pair.client, chunk)?;
            sync_client_interest(pair, registry)
        }
    }
}

fn sync_client_interest(pair: &mut ConnectionPair, registry: &Registry) -> io::Result<()> {
    let wants_write = !pair.to_client.is_empty();
    if wants_write == pair.client_write_interest {
        return Ok(());
    }
    let interest = if wants_write {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    registry.reregister(&mut pair.client, pair.client_token, interest)?;
    pair.client_write_interest = wants_write;
    Ok(())
}

fn sync_upstream_interest(pair: &mut ConnectionPair, registry: &Registry) -> io::Result<()> {
    let wants_write = !pair.to_upstream.is_empty();
    if wants_write == pair.upstream_write_interest {
        return Ok(());
    }
    let interest = if wants_write {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    registry.reregister(&mut pair.upstream, pair.upstream_token, interest)?;
    pair.upstream_write_interest = wants_write;
    Ok(())
}
