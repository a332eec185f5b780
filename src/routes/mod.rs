//! HTTP request routing for the inventory gateway
//!
//! Every request goes through one pipeline:
//! - classify the path
//! - reject methods other than GET (405)
//! - reject unknown paths (404)
//! - parse the query string
//! - run the handler and serialize its envelope
//!
//! Paths:
//! - GET /s3/buckets - ListBuckets
//! - GET /s3/buckets/{bucket} - BucketInfo
//! - GET /vsphere/datacenters?path=... - VSphereInventory

mod handlers;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
    Router,
};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::form_urlencoded;
use uuid::Uuid;

use crate::clients::ClientFactory;
use crate::context::RequestContext;
use crate::envelope::{Mode, ResponseEnvelope};
use crate::errors::{GatewayError, Result};
use crate::metrics;

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Request shape derived from the URL path alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Invalid,
    ListBuckets,
    BucketInfo(String),
    VSphereInventory,
}

impl RequestKind {
    fn label(&self) -> &'static str {
        match self {
            RequestKind::Invalid => "Invalid",
            RequestKind::ListBuckets => Mode::ListBuckets.as_str(),
            RequestKind::BucketInfo(_) => Mode::BucketInfo.as_str(),
            RequestKind::VSphereInventory => Mode::VSphereInventory.as_str(),
        }
    }
}

/// Classify a request path. The path is percent-decoded before it is split,
/// so an encoded `/` adds a segment. Matching is exact and case-sensitive; a
/// trailing slash or any extra segment makes the path invalid.
pub fn classify(path: &str) -> RequestKind {
    let Ok(decoded) = percent_decode_str(path).decode_utf8() else {
        return RequestKind::Invalid;
    };
    let segments: Vec<&str> = decoded
        .strip_prefix('/')
        .unwrap_or(&*decoded)
        .split('/')
        .collect();
    match segments.as_slice() {
        ["s3", "buckets"] => RequestKind::ListBuckets,
        ["s3", "buckets", bucket] if !bucket.is_empty() => RequestKind::BucketInfo(bucket.to_string()),
        ["vsphere", "datacenters"] => RequestKind::VSphereInventory,
        _ => RequestKind::Invalid,
    }
}

/// Recognized query parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// Requested field names; logged only
    pub fields: Vec<String>,
    /// vSphere inventory path, empty when absent
    pub path: String,
    /// Per-call deadline override
    pub deadline: Option<Duration>,
}

impl QueryParams {
    /// Parse a raw query string. Bad percent escapes are a malformed query;
    /// an unusable `deadline` is an invalid request.
    pub fn parse(query: &str) -> Result<Self> {
        check_escapes(query)?;

        let mut params = QueryParams::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "fields" => params.fields.push(value.into_owned()),
                "path" => params.path = value.into_owned(),
                "deadline" => params.deadline = Some(parse_deadline(&value)?),
                other => debug!(parameter = %other, "Ignoring unknown query parameter"),
            }
        }
        Ok(params)
    }
}

/// Every `%` must start a two-digit hex escape and every key and value must
/// decode to UTF-8. The form decoder itself accepts both leniently.
fn check_escapes(query: &str) -> Result<()> {
    let bytes = query.as_bytes();
    for (offset, _) in query.match_indices('%') {
        let valid = bytes
            .get(offset + 1..offset + 3)
            .map_or(false, |hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(GatewayError::MalformedQuery(format!(
                "invalid escape at offset {} in '{}'",
                offset, query
            )));
        }
    }
    for component in query.split(|c| c == '&' || c == '=') {
        percent_decode_str(component)
            .decode_utf8()
            .map_err(|_| GatewayError::MalformedQuery("query is not valid UTF-8".to_string()))?;
    }
    Ok(())
}

fn parse_deadline(value: &str) -> Result<Duration> {
    let invalid = || GatewayError::InvalidRequest(format!("invalid deadline '{}'", value));
    let secs: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn ClientFactory>,
    /// Per-call deadline when the request does not set one
    pub default_deadline: Duration,
    /// Datacenter path used when a request has no `path`
    pub default_dc_path: String,
    /// Datacenters, and hosts within each datacenter, described at once
    pub max_concurrency: usize,
    pub verbose: bool,
}

/// Create the gateway router. All paths go through the same dispatcher.
pub fn create_router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("request", %request_id, %method, path = %uri.path());
    serve(state, request_id, method, uri).instrument(span).await
}

async fn serve(state: AppState, request_id: Uuid, method: Method, uri: Uri) -> Response {
    let started = Instant::now();
    let kind = classify(uri.path());
    let label = kind.label();

    let response = match pipeline(&state, request_id, &method, &uri, kind).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!(status = status.as_u16(), error = %e, "Request failed");
            } else {
                warn!(status = status.as_u16(), error = %e, "Request rejected");
            }
            e.into_response()
        }
    };

    let elapsed = started.elapsed().as_secs_f64();
    metrics::record_request(label, response.status().as_u16(), elapsed);
    info!(mode = label, status = response.status().as_u16(), elapsed, "Request completed");
    response
}

async fn pipeline(
    state: &AppState,
    request_id: Uuid,
    method: &Method,
    uri: &Uri,
    kind: RequestKind,
) -> Result<Response> {
    if *method != Method::GET {
        return Err(GatewayError::MethodNotAllowed);
    }
    if kind == RequestKind::Invalid {
        return Err(GatewayError::UnsupportedPath);
    }

    let query = QueryParams::parse(uri.query().unwrap_or(""))?;
    if !query.fields.is_empty() {
        debug!(fields = ?query.fields, "Requested fields");
    }

    let ctx = RequestContext::new(request_id, query.deadline.unwrap_or(state.default_deadline));

    let envelope = match kind {
        RequestKind::ListBuckets => handlers::list_buckets(state, &ctx).await,
        RequestKind::BucketInfo(bucket) => handlers::bucket_info(state, &ctx, &bucket).await,
        RequestKind::VSphereInventory => handlers::vsphere_inventory(state, &ctx, &query.path).await,
        RequestKind::Invalid => Err(GatewayError::UnsupportedPath),
    }?;

    json_response(&envelope)
}

fn json_response(envelope: &ResponseEnvelope) -> Result<Response> {
    let body = serde_json::to_vec(envelope)?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8)),
            (
                HeaderName::from_static("x-clacks-overhead"),
                HeaderValue::from_static("GNU Terry Pratchett"),
            ),
        ],
        body,
    )
        .into_response())
}
