use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{error, info};

use crate::proxy::pair::ConnectionPair;
use crate::proxy::relay::{self, Direction, RelayStatus};
use crate::proxy::rewrite::HostRewriter;
use crate::server::acceptor::Acceptor;

/// Token of the listening socket; connection tokens are allocated above it.
const LISTENER: Token = Token(0);

/// Poll timeout; bounds how long a stop request can go unobserved.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Readiness event buffer capacity per poll.
const EVENTS_CAPACITY: usize = 256;

/// What runs when a registered token reports readiness. Relay variants are
/// tagged with the direction whose source is the ready socket and carry
/// their pair as context.
#[derive(Clone)]
pub(crate) enum Handler {
    Accept,
    RelayClientToUpstream(Rc<RefCell<ConnectionPair>>),
    RelayUpstreamToClient(Rc<RefCell<ConnectionPair>>),
}

/// Registration table mapping ready tokens to their handlers. Owned
/// exclusively by the event loop; handlers themselves only hold sockets.
pub(crate) struct HandlerTable {
    entries: HashMap<Token, Handler>,
    next_token: usize,
}

impl HandlerTable {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_token: LISTENER.0 + 1,
        }
    }

    pub(crate) fn alloc(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub(crate) fn insert(&mut self, token: Token, handler: Handler) {
        self.entries.insert(token, handler);
    }

    fn remove(&mut self, token: Token) {
        self.entries.remove(&token);
    }

    fn get(&self, token: Token) -> Option<&Handler> {
        self.entries.get(&token)
    }
}

/// Requests loop termination; honored at the next poll boundary.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// The underlying flag, for wiring into OS signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// One relay instance: a listener, a readiness multiplexer, and the table
/// of live connection pairs. Instances are independently constructible and
/// share no state with each other.
pub struct Proxy {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Acceptor,
    rewriter: HostRewriter,
    table: HandlerTable,
    shutdown: Arc<AtomicBool>,
}

impl Proxy {
    /// Binds the listener and registers it with the multiplexer. Polling
    /// does not begin until `run` is called. A bind or registration
    /// failure leaves nothing registered.
    pub fn start(bind: SocketAddr, target_port: u16) -> Result<Self> {
        let poll = Poll::new().context("failed to create poll instance")?;
        let mut listener =
            TcpListener::bind(bind).with_context(|| format!("failed to bind {bind}"))?;
        let local_addr = listener
            .local_addr()
            .context("listener has no local address")?;

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("failed to register listener")?;

        let mut table = HandlerTable::new();
        table.insert(LISTENER, Handler::Accept);

        info!(addr = %local_addr, target_port, "relay listening");

        Ok(Self {
            poll,
            listener,
            local_addr,
            acceptor: Acceptor::new(target_port),
            rewriter: HostRewriter::new(target_port),
            table,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address the listener actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the event loop until a stop is requested, then closes every
    /// registered socket and releases the multiplexer.
    ///
    /// A poll failure does not terminate the relay: the loop logs, pauses
    /// briefly, and continues.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed");
                std::thread::sleep(POLL_RETRY_DELAY);
                continue;
            }

            for event in events.iter() {
                // A pair torn down earlier in this batch has no entry left,
                // so its remaining events fall through here.
                let handler = self.table.get(event.token()).cloned();
                match handler {
                    Some(Handler::Accept) => {
                        self.acceptor.accept_ready(
                            &mut self.listener,
                            self.poll.registry(),
                            &mut self.table,
                        );
                    }
                    Some(Handler::RelayClientToUpstream(pair)) => {
                        self.dispatch_relay(
                            pair,
                            Direction::ClientToUpstream,
                            event.is_readable(),
                            event.is_writable(),
                        );
                    }
                    Some(Handler::RelayUpstreamToClient(pair)) => {
                        self.dispatch_relay(
                            pair,
                            Direction::UpstreamToClient,
                            event.is_readable(),
                            event.is_writable(),
                        );
                    }
                    None => {}
                }
            }
        }

        info!("stop requested, shutting down");
        self.shutdown_all();
        Ok(())
    }

    fn dispatch_relay(
        &mut self,
        pair: Rc<RefCell<ConnectionPair>>,
        dir: Direction,
        readable: bool,
        writable: bool,
    ) {
        let status = relay::on_ready(
            &mut pair.borrow_mut(),
            dir,
            readable,
            writable,
            &self.rewriter,
            self.poll.registry(),
        );
        if status == RelayStatus::TearDown {
            self.teardown(&pair);
        }
    }

    /// Removes the pair's registrations and closes both halves.
    fn teardown(&mut self, pair: &Rc<RefCell<ConnectionPair>>) {
        let (client_token, upstream_token) = {
            let p = pair.borrow();
            (p.client_token, p.upstream_token)
        };
        self.table.remove(client_token);
        self.table.remove(upstream_token);
        pair.borrow_mut().close(self.poll.registry());
    }

    fn shutdown_all(&mut self) {
        // Each pair appears under both of its tokens; collecting one side
        // is enough, and close() guards against the other.
        let pairs: Vec<Rc<RefCell<ConnectionPair>>> = self
            .table
            .entries
            .values()
            .filter_map(|handler| match handler {
                Handler::RelayClientToUpstream(pair) => Some(Rc::clone(pair)),
                _ => None,
            })
            .collect();

        for pair in pairs {
            pair.borrow_mut().close(self.poll.registry());
        }
        self.table.entries.clear();

        let _ = self.poll.registry().deregister(&mut self.listener);
    }
}
