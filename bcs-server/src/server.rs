//! The readiness-driven event loop.
//!
//! One tokio task owns the listener and every client socket. Each turn of
//! the loop runs a relay pass, waits (bounded) for the listener or any
//! client to become readable, takes in at most one byte per readable client
//! and sends due keepalives. Nothing else in the process touches sessions.

use std::io;
use std::net::SocketAddr;
use std::task::Poll;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::console::Console;
use crate::error::RelayError;
use crate::link::TcpLink;
use crate::relay::{Hub, Limits};

const REFUSAL_WRITABLE_WAIT: Duration = Duration::from_secs(1);

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Serve until interrupted (Ctrl+C).
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C");
                trigger.cancel();
            }
        });
        self.serve(shutdown).await
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let event_loop = self.bind().await?;
        event_loop.run(shutdown).await
    }

    /// Bind and run in the background (for testing).
    ///
    /// Returns the bound address, the token that stops the loop and the
    /// loop's handle.
    pub async fn start(self) -> Result<(SocketAddr, CancellationToken, JoinHandle<Result<()>>)> {
        let event_loop = self.bind().await?;
        let addr = event_loop.listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(event_loop.run(shutdown.clone()));
        Ok((addr, shutdown, handle))
    }

    async fn bind(self) -> Result<EventLoop> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        tracing::info!("Listening on {local}");

        let console = Console::open(self.config.logfile.as_deref())
            .context("failed to open console log")?;

        Ok(EventLoop {
            listener,
            hub: Hub::new(Limits::from(&self.config)),
            console,
            wait: self.config.wait_timeout(),
            port: local.port(),
        })
    }
}

enum Wake {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Readable,
    Timeout,
}

struct EventLoop {
    listener: TcpListener,
    hub: Hub<TcpLink>,
    console: Console,
    wait: Duration,
    port: u16,
}

impl EventLoop {
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.hub.console_write(&format!(
            "{} {}\nWaiting for connections on port: {}...\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.port
        ));

        while !shutdown.is_cancelled() {
            self.pass();

            match self.wait_ready(&shutdown).await {
                Wake::Shutdown => break,
                Wake::Accepted(Ok((stream, peer))) => {
                    self.admit(stream, peer).await;
                    self.hub.poll_reads(Instant::now());
                }
                Wake::Accepted(Err(e)) => {
                    tracing::warn!("{}", RelayError::Accept(e));
                }
                Wake::Readable => self.hub.poll_reads(Instant::now()),
                Wake::Timeout => {}
            }

            self.hub.send_keepalives(Instant::now());
        }

        tracing::info!(sessions = self.hub.len(), "shutting down");
        self.hub.close_all();
        self.flush_console();
        Ok(())
    }

    /// One relay pass, in the fixed order the protocol relies on.
    fn pass(&mut self) {
        self.hub.authorize_pending();
        self.hub.close_pending();
        self.hub.remove_closed();
        self.hub.route_ready();
        self.flush_console();
        self.hub.notify_roster_changes();
        self.hub.flush_outbound();
    }

    /// The only suspension point of the loop.
    async fn wait_ready(&self, shutdown: &CancellationToken) -> Wake {
        let readable = std::future::poll_fn(|cx| {
            for link in self.hub.readable_links() {
                if link.poll_read_ready(cx).is_ready() {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        });

        tokio::select! {
            _ = shutdown.cancelled() => Wake::Shutdown,
            accepted = self.listener.accept() => Wake::Accepted(accepted),
            _ = readable => Wake::Readable,
            _ = tokio::time::sleep(self.wait) => Wake::Timeout,
        }
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {e}");
        }
        // a fresh socket has no write readiness registered yet, and the
        // refusal notice is written exactly once
        if self.hub.is_full() {
            match tokio::time::timeout(REFUSAL_WRITABLE_WAIT, stream.writable()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(%peer, "refused socket not writable: {e}"),
                Err(_) => tracing::debug!(%peer, "refused socket not writable in time"),
            }
        }
        match self.hub.admit(TcpLink::new(stream, peer), Instant::now()) {
            Ok(id) => tracing::debug!(session_id = %id, %peer, "accepted"),
            Err(e) => tracing::debug!(%peer, "not admitted: {e}"),
        }
    }

    fn flush_console(&mut self) {
        let bytes = self.hub.take_console();
        if bytes.is_empty() {
            return;
        }
        if let Err(e) = self.console.write(&bytes) {
            tracing::warn!("console write failed: {e}");
        }
    }
}
