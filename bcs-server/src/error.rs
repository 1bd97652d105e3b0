//! Error taxonomy for the relay.
//!
//! Per-session errors never abort the event loop: they are logged and the
//! affected session is scheduled for closure. Only [`RelayError::Bind`] is
//! fatal, and only at startup.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("partial write ({written} of {wanted} bytes)")]
    PartialWrite { written: usize, wanted: usize },
    #[error("too many connections (limit {limit})")]
    CapacityExceeded { limit: usize },
    #[error("could not open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
