//! Inventory Gateway - infrastructure inventory over HTTP
//!
//! Exposes AWS S3 buckets and objects and VMware vSphere datacenters, hosts
//! and datastores as JSON. Each request is classified by path, answered by
//! the matching adapter and wrapped in a uniform response envelope.

mod clients;
mod config;
mod context;
mod envelope;
mod errors;
mod metrics;
mod routes;
mod s3;
mod server;
mod vsphere;

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::clients::SdkClientFactory;
use crate::config::Config;
use crate::server::Server;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration from environment and optional config file
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("inventory-gateway: {}", e);
            return ExitCode::from(2);
        }
    };

    // Initialize tracing with JSON output for structured logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(e) = metrics::init_metrics() {
        warn!(error = %e, "Failed to register metrics");
    }

    info!("Starting Inventory Gateway");
    info!(?config, "Configuration loaded");

    let factory = Arc::new(SdkClientFactory::new(
        config.s3.clone(),
        config.vsphere.clone(),
    ));
    let server = Server::new(config, factory);

    // Handle graceful shutdown
    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    };

    if let Err(e) = server.start(shutdown_signal).await {
        error!(error = %e, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
