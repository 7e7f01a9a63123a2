//! Line chat - Entry Point
//!
//! `linechat runserver` starts the server; `linechat <userid>` starts the
//! console client logged in as that userid.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use linechat::cli::{Cli, Role};
use linechat::{console, ChatServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=linechat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("linechat=info")),
        )
        .init();

    match Cli::parse().role() {
        Role::Server(config) => {
            info!(
                "Starting server on {} (fanout: {:?}, faults: {:?})",
                config.addr, config.fanout_policy, config.fault_policy
            );
            let server = ChatServer::bind(config).await?;
            server.run().await?;
        }
        Role::Client { userid, addr } => {
            console::run(&addr, &userid).await?;
        }
    }

    Ok(())
}
