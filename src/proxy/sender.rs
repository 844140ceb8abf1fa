use std::io::{self, ErrorKind, Write};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;

/// Ordered write queue in front of one non-blocking socket.
///
/// Writes go straight to the socket while it accepts them; the unwritten
/// tail is queued and drained from the event loop once the socket reports
/// write readiness again.
#[derive(Debug, Default)]
pub struct SendQueue {
    pending: BytesMut,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes `data` to the socket, queueing whatever the socket does not
    /// accept. Bytes already pending drain first, so order is preserved.
    /// A zero-length write on a healthy socket is a broken connection.
    pub fn send(&mut self, sock: &mut TcpStream, data: &[u8]) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.pending.extend_from_slice(data);
            return Ok(());
        }

        let mut written = 0;
        while written < data.len() {
            match sock.write(&data[written..]) {
                Ok(0) => return Err(broken_connection()),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.pending.extend_from_slice(&data[written..]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drains pending bytes until the queue is empty or the socket would
    /// block again.
    pub fn flush(&mut self, sock: &mut TcpStream) -> io::Result<()> {
        while !self.pending.is_empty() {
            match sock.write(self.pending.chunk()) {
                Ok(0) => return Err(broken_connection()),
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn broken_connection() -> io::Error {
    io::Error::new(ErrorKind::WriteZero, "socket connection broken")
}
