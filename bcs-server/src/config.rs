//! Server configuration (CLI flags with `BCS_*` environment fallbacks).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 2112;
pub const DEFAULT_MAX_CLIENTS: usize = 50;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 50;
pub const DEFAULT_MAX_NAME_LEN: usize = 50;
pub const DEFAULT_MAX_COMMAND_LEN: usize = 1024;
pub const DEFAULT_LOGIN_MARKER: &str = "LOGIN=";

#[derive(Parser, Debug, Clone)]
#[command(name = "bcs-server", version, about = "Line-oriented broadcast relay")]
pub struct ServerConfig {
    /// Port to listen on
    #[arg(short = 'p', long, env = "BCS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind (all interfaces by default)
    #[arg(short = 'i', long, env = "BCS_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Append the console transcript to this file instead of stdout
    #[arg(short = 'l', long, env = "BCS_LOGFILE")]
    pub logfile: Option<PathBuf>,

    /// Maximum tracked sessions (authorized + pending login)
    #[arg(long, env = "BCS_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,

    /// Capacity of each buffer chunk in bytes
    #[arg(long, env = "BCS_CHUNK_SIZE", default_value_t = crate::queue::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Seconds between keepalive pings
    #[arg(long = "ping-interval-secs", env = "BCS_PING_INTERVAL", default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    pub ping_interval_secs: u64,

    /// Name length cap; stored names hold at most this many chars minus one
    #[arg(long, env = "BCS_MAX_NAME_LEN", default_value_t = DEFAULT_MAX_NAME_LEN)]
    pub max_name_len: usize,

    /// Command accumulator cap; holds at most this many bytes minus one
    #[arg(long, env = "BCS_MAX_COMMAND_LEN", default_value_t = DEFAULT_MAX_COMMAND_LEN)]
    pub max_command_len: usize,

    /// Marker that precedes the name in the login line (`<marker><name>;`)
    #[arg(long, env = "BCS_LOGIN_MARKER", default_value = DEFAULT_LOGIN_MARKER)]
    pub login_marker: String,

    /// Upper bound on a single readiness wait, in seconds
    #[arg(long, env = "BCS_WAIT_SECS", default_value_t = 5)]
    pub wait_secs: u64,

    /// Bytes handed to the socket per write call
    #[arg(long, env = "BCS_WRITE_BUDGET", default_value_t = 512)]
    pub write_budget: usize,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_secs.max(1))
    }

    /// Longest name that can be stored (the cap includes a terminator slot).
    pub fn name_limit(&self) -> usize {
        self.max_name_len.saturating_sub(1).max(1)
    }

    /// Longest command line that can be accumulated.
    pub fn command_limit(&self) -> usize {
        self.max_command_len.saturating_sub(1).max(1)
    }

    /// Config for tests: loopback, ephemeral port, otherwise defaults.
    pub fn loopback() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            logfile: None,
            max_clients: DEFAULT_MAX_CLIENTS,
            chunk_size: crate::queue::DEFAULT_CHUNK_SIZE,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            login_marker: DEFAULT_LOGIN_MARKER.to_string(),
            wait_secs: 5,
            write_budget: 512,
        }
    }
}
