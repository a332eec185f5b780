//! HTTP server implementation
//!
//! Sets up the Axum HTTP server with:
//! - The gateway dispatcher
//! - Middleware (request tracing, compression)
//! - An optional Prometheus listener on its own address
//! - Graceful shutdown

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::clients::ClientFactory;
use crate::config::Config;
use crate::metrics;
use crate::routes::{self, AppState};

/// Failures that stop the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// HTTP server for the inventory gateway
pub struct Server {
    config: Config,
    factory: Arc<dyn ClientFactory>,
}

impl Server {
    pub fn new(config: Config, factory: Arc<dyn ClientFactory>) -> Self {
        Self { config, factory }
    }

    /// Build the Axum router with all middleware
    fn build_router(&self) -> Router {
        let state = AppState {
            factory: self.factory.clone(),
            default_deadline: self.config.default_deadline(),
            default_dc_path: self.config.vsphere.dc_path.clone(),
            max_concurrency: self.config.server.max_concurrency,
            verbose: self.config.vsphere.verbose,
        };

        routes::create_router(state).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .into_inner(),
        )
    }

    /// Bind the listeners and serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.build_router();

        let address = self.config.server.bind_address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        info!(address = %address, "Server listening");

        if let Some(metrics_address) = self.config.server.metrics_address {
            let metrics_listener = TcpListener::bind(metrics_address)
                .await
                .map_err(|source| ServerError::Bind {
                    address: metrics_address,
                    source,
                })?;
            info!(address = %metrics_address, "Metrics listening");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(metrics_listener, metrics_router()).await {
                    error!(error = %e, "Metrics listener failed");
                }
            });
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubFactory, StubS3};
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_compresses_when_asked() {
        let stub = StubS3::with_buckets((0..200).map(|_| "bucket").collect());
        let server = Server::new(Config::default(), Arc::new(StubFactory::with_s3(stub)));

        let response = server
            .build_router()
            .oneshot(
                Request::builder()
                    .uri("/s3/buckets")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        metrics::record_request("ListBuckets", 200, 0.01);
        let response = metrics_router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = Config::default();
        config.server.bind_address = taken.local_addr().unwrap();
        let server = Server::new(config, Arc::new(StubFactory::default()));

        let err = server.start(async {}).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
