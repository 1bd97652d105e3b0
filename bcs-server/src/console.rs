//! Destination for the human-readable relay transcript.
//!
//! This is not diagnostics (those go through `tracing`): it is the running
//! record of joins, leaves and public traffic the relay has always printed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::error::{RelayError, Result};

#[derive(Debug)]
pub enum Console {
    Stdout(io::Stdout),
    /// Opened in append mode.
    File(File),
}

impl Console {
    /// Stdout when `path` is `None`, otherwise the file, created if missing.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::Stdout(io::stdout())),
            Some(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Self::File)
                .map_err(|source| RelayError::LogFile {
                    path: path.to_path_buf(),
                    source,
                }),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdout(out) => {
                let mut out = out.lock();
                out.write_all(bytes)?;
                out.flush()
            }
            Self::File(file) => {
                file.write_all(bytes)?;
                file.flush()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        std::fs::write(&path, "earlier run\n").unwrap();

        let mut console = Console::open(Some(&path)).unwrap();
        console.write(b"-- Alice has joined the server.\n").unwrap();
        drop(console);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "earlier run\n-- Alice has joined the server.\n");
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("relay.log");
        let err = Console::open(Some(&path)).unwrap_err();
        assert!(matches!(err, RelayError::LogFile { .. }));
        assert!(err.to_string().contains("relay.log"));
    }
}
