use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (BCS_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("BCS_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("bcs_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = bcs_server::config::ServerConfig::parse();
    tracing::info!("Starting relay on {}", config.listen_addr());
    if let Some(ref path) = config.logfile {
        tracing::info!("Console transcript appended to {}", path.display());
    }

    let server = bcs_server::server::Server::new(config);
    server.run().await
}
