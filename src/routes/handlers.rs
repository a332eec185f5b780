//! Request handlers for the inventory endpoints

use chrono::Utc;
use tracing::{info, instrument};

use super::AppState;
use crate::context::RequestContext;
use crate::envelope::ResponseEnvelope;
use crate::errors::Result;
use crate::s3::S3Adapter;
use crate::vsphere::VSphereAdapter;

/// ListBuckets - GET /s3/buckets
#[instrument(skip(state, ctx))]
pub async fn list_buckets(state: &AppState, ctx: &RequestContext) -> Result<ResponseEnvelope> {
    let started = Utc::now();
    info!("ListBuckets request");

    let provider = ctx.call("s3", "connect", state.factory.s3()).await?;
    let buckets = S3Adapter::new(provider).list_buckets(ctx).await?;

    Ok(ResponseEnvelope::buckets(started, buckets))
}

/// BucketInfo - GET /s3/buckets/{bucket}
#[instrument(skip(state, ctx))]
pub async fn bucket_info(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &str,
) -> Result<ResponseEnvelope> {
    let started = Utc::now();
    info!(bucket = %bucket, "BucketInfo request");

    let provider = ctx.call("s3", "connect", state.factory.s3()).await?;
    let objects = S3Adapter::new(provider).list_objects(ctx, bucket).await?;

    Ok(ResponseEnvelope::objects(started, objects))
}

/// VSphereInventory - GET /vsphere/datacenters?path=...
#[instrument(skip(state, ctx))]
pub async fn vsphere_inventory(
    state: &AppState,
    ctx: &RequestContext,
    path: &str,
) -> Result<ResponseEnvelope> {
    let started = Utc::now();
    let path = if path.is_empty() {
        state.default_dc_path.as_str()
    } else {
        path
    };
    info!(path = %path, "VSphereInventory request");

    let provider = ctx.call("vsphere", "connect", state.factory.vsphere()).await?;
    let adapter = VSphereAdapter::new(provider, state.verbose, state.max_concurrency);
    let (datacenters, errors) = adapter.describe_inventory(ctx, path).await?;

    Ok(ResponseEnvelope::inventory(started, datacenters, errors))
}
