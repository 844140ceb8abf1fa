use std::cell::RefCell;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry};
use tracing::{info, warn};

use crate::proxy::pair::ConnectionPair;
use crate::server::event_loop::{Handler, HandlerTable};

/// Pairs each accepted client with a fresh loopback connection and hands
/// both halves to the event loop.
pub(crate) struct Acceptor {
    target: SocketAddr,
}

impl Acceptor {
    pub(crate) fn new(target_port: u16) -> Self {
        Self {
            target: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), target_port),
        }
    }

    /// Accepts every pending connection. A failed accept or upstream
    /// connect closes whatever was opened and registers nothing, then the
    /// next pending connection is tried.
    pub(crate) fn accept_ready(
        &self,
        listener: &mut TcpListener,
        registry: &Registry,
        table: &mut HandlerTable,
    ) {
        loop {
            let (client, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            };

            match self.pair_up(client, peer, registry, table) {
                Ok(()) => info!(peer = %peer, "new connection"),
                Err(e) => warn!(peer = %peer, error = %e, "failed to set up connection"),
            }
        }
    }

    /// Connects upstream and registers both halves, or returns the error
    /// with every opened socket dropped.
    fn pair_up(
        &self,
        mut client: TcpStream,
        peer: SocketAddr,
        registry: &Registry,
        table: &mut HandlerTable,
    ) -> io::Result<()> {
        let upstream = std::net::TcpStream::connect(self.target)?;
        upstream.set_nonblocking(true)?;
        let mut upstream = TcpStream::from_std(upstream);

        let client_token = table.alloc();
        let upstream_token = table.alloc();

        registry.register(&mut client, client_token, Interest::READABLE)?;
        if let Err(e) = registry.register(&mut upstream, upstream_token, Interest::READABLE) {
            // Never leave a half-registered pair behind.
            let _ = registry.deregister(&mut client);
            return Err(e);
        }

        let pair = Rc::new(RefCell::new(ConnectionPair::new(
            client,
            upstream,
            client_token,
            upstream_token,
            peer,
        )));
        table.insert(client_token, Handler::RelayClientToUpstream(Rc::clone(&pair)));
        table.insert(upstream_token, Handler::RelayUpstreamToClient(pair));
        Ok(())
    }
}
