//! Socket collaborator consumed by the relay core.
//!
//! The core never blocks on a socket: reads take at most one byte and
//! return `Ok(None)` when nothing is available, writes report a short
//! count as [`RelayError::PartialWrite`].

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::task::{Context, Poll};

use tokio::net::TcpStream;

use crate::error::{RelayError, Result};

/// Upper bound on bytes discarded while draining a socket before close.
const CLOSE_DRAIN_LIMIT: usize = 4096;

pub trait Link {
    /// Read a single byte if one is available.
    ///
    /// `Err(RelayError::Closed)` means the peer hung up.
    fn try_read_byte(&mut self) -> Result<Option<u8>>;

    /// Hand all of `bytes` to the socket, or fail.
    fn write_all(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Close the socket. Called exactly once per link.
    fn close(self);
}

/// A tokio TCP stream driven with non-blocking `try_*` calls.
#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpLink {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Register interest in readability with the current task.
    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_read_ready(cx)
    }
}

impl Link for TcpLink {
    fn try_read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.stream.try_read(&mut buf) {
            Ok(0) => Err(RelayError::Closed),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(RelayError::Read(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.try_write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RelayError::Write(e)),
            }
        }
        if written < bytes.len() {
            return Err(RelayError::PartialWrite {
                written,
                wanted: bytes.len(),
            });
        }
        Ok(written)
    }

    fn close(self) {
        let peer = self.peer;
        let mut stream = match self.stream.into_std() {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(%peer, "could not detach stream for close: {e}");
                return;
            }
        };
        // half-close so queued output is delivered, then discard unread
        // input so the kernel does not answer the close with a reset
        let _ = stream.shutdown(Shutdown::Write);
        let mut scratch = [0u8; 512];
        let mut drained = 0;
        while drained < CLOSE_DRAIN_LIMIT {
            match stream.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
        tracing::debug!(%peer, drained, "socket closed");
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Default)]
    pub struct Wire {
        pub incoming: VecDeque<u8>,
        pub outgoing: Vec<u8>,
        pub closed: bool,
        pub hung_up: bool,
        /// Accept at most this many bytes per write call.
        pub write_limit: Option<usize>,
    }

    /// In-memory link; the test keeps a handle to the shared wire.
    #[derive(Debug, Clone, Default)]
    pub struct MockLink(pub Rc<RefCell<Wire>>);

    impl MockLink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn send(&self, bytes: &[u8]) {
            self.0.borrow_mut().incoming.extend(bytes.iter().copied());
        }

        pub fn hang_up(&self) {
            self.0.borrow_mut().hung_up = true;
        }

        /// Take everything written so far as text.
        pub fn take_output(&self) -> String {
            let out = std::mem::take(&mut self.0.borrow_mut().outgoing);
            String::from_utf8_lossy(&out).into_owned()
        }

        pub fn is_closed(&self) -> bool {
            self.0.borrow().closed
        }

        pub fn limit_writes(&self, limit: usize) {
            self.0.borrow_mut().write_limit = Some(limit);
        }
    }

    impl Link for MockLink {
        fn try_read_byte(&mut self) -> Result<Option<u8>> {
            let mut wire = self.0.borrow_mut();
            match wire.incoming.pop_front() {
                Some(b) => Ok(Some(b)),
                None if wire.hung_up => Err(RelayError::Closed),
                None => Ok(None),
            }
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<usize> {
            let mut wire = self.0.borrow_mut();
            let n = wire.write_limit.map_or(bytes.len(), |l| l.min(bytes.len()));
            wire.outgoing.extend_from_slice(&bytes[..n]);
            if n < bytes.len() {
                return Err(RelayError::PartialWrite {
                    written: n,
                    wanted: bytes.len(),
                });
            }
            Ok(n)
        }

        fn close(self) {
            self.0.borrow_mut().closed = true;
        }
    }
}
