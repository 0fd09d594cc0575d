//! chunklog HTTP server binary entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunklog::server::{CliArgs, LogServer, LogServerConfig};
use chunklog::{CachedCatalog, InMemoryCatalog, Service};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = args.to_config().expect("Invalid configuration");
    let server_config = LogServerConfig::from(&args);

    tracing::info!("Opening store with config: {:?}", config);

    // Log definitions and chunk lists are kept in memory; chunk files from a
    // previous run are not reattached.
    let catalog = Arc::new(CachedCatalog::new(InMemoryCatalog::new()));
    let service = Service::open(&config, catalog).expect("Failed to open store");

    let server = LogServer::new(Arc::new(service), server_config);
    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "server failed");
        std::process::exit(1);
    }
}
