use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use mio::{Registry, Token};
use tracing::info;

use crate::proxy::sender::SendQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    Open,
    Closed,
}

/// The linked client-side and upstream-side sockets of one relayed session.
///
/// Both halves are registered with the event loop together and torn down
/// together. `close` is guarded by an explicit state flag so either
/// directional handler may invoke it without coordination, and repeated
/// teardown is a safe no-op.
pub struct ConnectionPair {
    pub(crate) client: TcpStream,
    pub(crate) upstream: TcpStream,
    pub(crate) client_token: Token,
    pub(crate) upstream_token: Token,
    pub(crate) peer: SocketAddr,
    /// Bytes read from the client, waiting on the upstream socket.
    pub(crate) to_upstream: SendQueue,
    /// Bytes read from the upstream, waiting on the client socket.
    pub(crate) to_client: SendQueue,
    /// Whether write interest is currently registered for each half.
    pub(crate) client_write_interest: bool,
    pub(crate) upstream_write_interest: bool,
    state: PairState,
}

impl ConnectionPair {
    pub fn new(
        client: TcpStream,
        upstream: TcpStream,
        client_token: Token,
        upstream_token: Token,
        peer: SocketAddr,
    ) -> Self {
        Self {
            client,
            upstream,
            client_token,
            upstream_token,
            peer,
            to_upstream: SendQueue::new(),
            to_client: SendQueue::new(),
            client_write_interest: false,
            upstream_write_interest: false,
            state: PairState::Open,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == PairState::Closed
    }

    /// Unregisters both halves from the multiplexer and shuts both down.
    /// Each step tolerates a half that is already gone; repeated calls
    /// return immediately.
    pub fn close(&mut self, registry: &Registry) {
        if self.state == PairState::Closed {
            return;
        }
        self.state = PairState::Closed;

        let _ = registry.deregister(&mut self.client);
        let _ = registry.deregister(&mut self.upstream);
        let _ = self.client.shutdown(Shutdown::Both);
        let _ = self.upstream.shutdown(Shutdown::Both);

        info!(peer = %self.peer, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Interest, Poll};

    fn connected_streams() -> (TcpStream, TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let outbound = std::net::TcpStream::connect(addr).unwrap();
        let (inbound, _) = listener.accept().unwrap();
        inbound.set_nonblocking(true).unwrap();
        outbound.set_nonblocking(true).unwrap();
        (TcpStream::from_std(inbound), TcpStream::from_std(outbound))
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let poll = Poll::new().unwrap();
        let (mut client, mut upstream) = connected_streams();
        let peer = client.peer_addr().unwrap();

        poll.registry()
            .register(&mut client, Token(1), Interest::READABLE)
            .unwrap();
        poll.registry()
            .register(&mut upstream, Token(2), Interest::READABLE)
            .unwrap();

        let mut pair = ConnectionPair::new(client, upstream, Token(1), Token(2), peer);
        assert!(!pair.is_closed());

        pair.close(poll.registry());
        assert!(pair.is_closed());

        // The second teardown must not panic or double-close anything.
        pair.close(poll.registry());
        assert!(pair.is_closed());
    }
}
