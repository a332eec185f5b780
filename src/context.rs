//! Per-request context threaded through every adapter call
//!
//! Dropping the request future cancels in-flight provider calls; the
//! context adds the deadline and records per-call metrics.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{GatewayError, Result};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Applied to each provider call individually
    pub deadline: Duration,
}

impl RequestContext {
    pub fn new(request_id: Uuid, deadline: Duration) -> Self {
        Self {
            request_id,
            deadline,
        }
    }

    /// Run one provider call under the deadline.
    pub async fn call<T, E, F>(&self, provider: &'static str, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<GatewayError>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.deadline, fut).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(value)) => {
                metrics::record_provider_call(provider, operation, "ok", elapsed);
                debug!(request_id = %self.request_id, provider, operation, elapsed, "Provider call succeeded");
                Ok(value)
            }
            Ok(Err(e)) => {
                metrics::record_provider_call(provider, operation, "error", elapsed);
                let err = e.into();
                warn!(request_id = %self.request_id, provider, operation, error = %err, "Provider call failed");
                Err(err)
            }
            Err(_) => {
                metrics::record_provider_call(provider, operation, "timeout", elapsed);
                warn!(
                    request_id = %self.request_id,
                    provider,
                    operation,
                    deadline = ?self.deadline,
                    "Provider call exceeded deadline"
                );
                Err(GatewayError::Canceled(format!(
                    "{} {} exceeded the {:?} deadline",
                    provider, operation, self.deadline
                )))
            }
        }
    }
}
