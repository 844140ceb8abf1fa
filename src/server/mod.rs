//! Relay server core
//!
//! The event loop owns the readiness multiplexer, the listening socket,
//! and the registration table; the acceptor turns inbound connections into
//! registered connection pairs.
//!
//! # Control flow
//!
//! `Proxy::run` polls for readiness with a bounded timeout. Listener
//! readiness dispatches to the acceptor, which accepts the client, opens
//! the paired loopback connection, and registers both sockets. Data
//! readiness dispatches to the tagged relay handler for that socket, which
//! reads, rewrites (client side only), and forwards. EOF or an error on
//! either half tears the pair down. A stop request is observed at the next
//! poll boundary; shutdown closes every registered socket before `run`
//! returns.
//!
//! All handler logic executes on the single thread that called `run`, so
//! no two handlers ever touch the same connection pair concurrently.

pub(crate) mod acceptor;
pub mod event_loop;

pub use event_loop::{Proxy, StopHandle};
