//! Error types for the inventory gateway
//!
//! `GatewayError` is the error surfaced at the HTTP seam. Adapter errors
//! (`S3Error`, `VSphereError`) convert into it and are classified into the
//! response taxonomy: InvalidRequest, UpstreamFailure, Internal, Canceled.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::s3::S3Error;
use crate::vsphere::VSphereError;

/// Status used when the request context ends before the response is ready.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request method other than GET
    #[error("Invalid request method")]
    MethodNotAllowed,

    /// Path did not classify to a known request
    #[error("Unsupported path requested")]
    UnsupportedPath,

    /// Query string could not be parsed
    #[error("Malformed query string: {0}")]
    MalformedQuery(String),

    /// Invalid request input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A provider call failed
    #[error("{provider} request failed: {detail}")]
    Upstream { provider: &'static str, detail: String },

    /// The request deadline elapsed or the request was dropped
    #[error("Request canceled: {0}")]
    Canceled(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    #[allow(dead_code)] // Part of the response taxonomy; no gateway path raises it yet
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// User-visible failure body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

impl GatewayError {
    /// Taxonomy tag reported in the `error` field
    pub fn tag(&self) -> &'static str {
        match self {
            GatewayError::MethodNotAllowed
            | GatewayError::UnsupportedPath
            | GatewayError::MalformedQuery(_)
            | GatewayError::InvalidRequest(_) => "InvalidRequest",
            GatewayError::Upstream { .. } => "UpstreamFailure",
            GatewayError::Canceled(_) => "Canceled",
            GatewayError::Config(_)
            | GatewayError::Internal(_)
            | GatewayError::Serialization(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::UnsupportedPath => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Canceled(_) => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::REQUEST_TIMEOUT),
            GatewayError::MalformedQuery(_)
            | GatewayError::Config(_)
            | GatewayError::Internal(_)
            | GatewayError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, GatewayError::Canceled(_))
    }

    /// Human-readable detail without the variant prefix
    pub fn detail(&self) -> String {
        match self {
            GatewayError::Upstream { detail, .. }
            | GatewayError::Canceled(detail)
            | GatewayError::InvalidRequest(detail)
            | GatewayError::MalformedQuery(detail)
            | GatewayError::Internal(detail)
            | GatewayError::Config(detail) => detail.clone(),
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.tag().to_string(),
            detail: self.detail(),
        }
    }
}

impl From<S3Error> for GatewayError {
    fn from(err: S3Error) -> Self {
        GatewayError::Upstream {
            provider: "s3",
            detail: err.to_string(),
        }
    }
}

impl From<VSphereError> for GatewayError {
    fn from(err: VSphereError) -> Self {
        match err {
            VSphereError::InvalidPath { .. } => GatewayError::InvalidRequest(err.to_string()),
            err => GatewayError::Upstream {
                provider: "vsphere",
                detail: err.to_string(),
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            // Routing rejections keep the plain-text bodies clients already parse
            GatewayError::MethodNotAllowed | GatewayError::UnsupportedPath => (
                status,
                [(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())],
                self.to_string(),
            )
                .into_response(),
            _ => (status, Json(self.body())).into_response(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;
