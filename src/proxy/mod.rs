//! Per-connection relay machinery
//!
//! This module holds everything that happens to one relayed session after
//! it is accepted: the paired sockets and their lifecycle, the directional
//! relay handlers, the in-stream address rewriter, and the write queues
//! that absorb backpressure from non-blocking sockets.

pub mod pair;
pub mod relay;
pub mod rewrite;
pub mod sender;

pub use pair::ConnectionPair;
pub use relay::{Direction, RelayStatus};
pub use rewrite::HostRewriter;
pub use sender::SendQueue;
