//! Lobby server binary
//!
//! Usage: cargo run -p gambit_web --bin gambit-server -- --port 8080

use clap::Parser;
use gambit_web::{CliArgs, WebServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let resolved = gambit_web::config::load_with_sources(&cli)?;
    gambit_web::init_logging(resolved.config.log_format)?;

    let config = resolved.config;
    tracing::info!(
        host = %config.host,
        port = config.port,
        seed = ?config.seed,
        sources = ?resolved.sources,
        "starting gambit lobby"
    );

    let server = WebServer::new(config)?;
    let handle = server.start().await?;

    tracing::info!("server running at http://{}", handle.address());

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down server");
    handle.shutdown().await?;
    tracing::info!("server stopped cleanly");

    Ok(())
}
