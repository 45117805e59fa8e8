//! Ingest relay server
//!
//! Run with: ingest-relay [--config relay.toml]
//!
//! ## Publishing over FTL
//!
//! With OBS (FTL output):
//!   Server: ftl://localhost
//!   Stream Key: 42-secret
//!
//! ## Publishing over RTMP
//!
//! With ffmpeg:
//!   ffmpeg -re -i input.mp4 -c:v libx264 -c:a aac -f flv rtmp://localhost/live/42-secret
//!
//! Without a configuration file the built-in no-op service accepts the key
//! `secret` for every channel.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ingest_relay::service::{NoopOrchestrator, NoopService};
use ingest_relay::{Config, IngestServer, StreamRegistry};

#[derive(Parser, Debug)]
#[command(name = "ingest-relay")]
#[command(about = "Live-media ingest relay for FTL and RTMP publishers", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Arc::new(StreamRegistry::new(
        config.registry.clone(),
        Arc::new(NoopService::new(config.noop.secret.as_str())),
        Arc::new(NoopOrchestrator::new()),
    ));

    let server = IngestServer::bind(config.server.clone(), registry).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
