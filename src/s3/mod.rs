//! S3 inventory adapter
//!
//! The adapter lists buckets and flattens the paginated object listing of a
//! bucket. Providers sit behind the `S3Provider` trait so the SDK client can
//! be swapped for stubs.

mod aws;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::errors::Result;

pub use aws::AwsS3Provider;

const PROVIDER: &str = "s3";

/// Errors raised by S3 providers
#[derive(Error, Debug)]
pub enum S3Error {
    /// The SDK returned an error for an operation
    #[error("{operation} failed: {detail}")]
    Sdk {
        operation: &'static str,
        detail: String,
    },

    /// The provider returned a record without a required field
    #[error("{operation} returned an incomplete record: missing {field}")]
    Incomplete {
        operation: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketDescription {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectDescription {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectDescription>,
    /// Token for the following page; `None` on the last page
    pub next_token: Option<String>,
}

/// S3 provider operations used by the adapter
#[async_trait]
pub trait S3Provider: Send + Sync {
    /// List all buckets in provider order
    async fn list_buckets(&self) -> std::result::Result<Vec<BucketDescription>, S3Error>;

    /// Fetch one page of objects, starting from `token` when given
    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
    ) -> std::result::Result<ObjectPage, S3Error>;
}

/// Bucket and object listing on top of an `S3Provider`
pub struct S3Adapter {
    provider: Arc<dyn S3Provider>,
}

impl S3Adapter {
    pub fn new(provider: Arc<dyn S3Provider>) -> Self {
        Self { provider }
    }

    pub async fn list_buckets(&self, ctx: &RequestContext) -> Result<Vec<BucketDescription>> {
        let buckets = ctx
            .call(PROVIDER, "list_buckets", self.provider.list_buckets())
            .await?;
        info!(count = buckets.len(), "Listed buckets");
        Ok(buckets)
    }

    /// Concatenate every page of the bucket listing. A failed page fails the
    /// whole listing.
    pub async fn list_objects(
        &self,
        ctx: &RequestContext,
        bucket: &str,
    ) -> Result<Vec<ObjectDescription>> {
        let mut objects = Vec::new();
        let mut token = None;
        let mut page = 0usize;

        loop {
            let result = ctx
                .call(
                    PROVIDER,
                    "list_objects",
                    self.provider.list_objects_page(bucket, token.take()),
                )
                .await?;
            debug!(bucket = %bucket, page, count = result.objects.len(), "Fetched object page");
            objects.extend(result.objects);
            page += 1;

            match result.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(bucket = %bucket, pages = page, count = objects.len(), "Listed objects");
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayError;
    use crate::testing::StubS3;
    use std::time::Duration;
    use uuid::Uuid;

    fn object(key: &str, size: i64) -> ObjectDescription {
        ObjectDescription {
            key: key.to_string(),
            size,
            last_modified: None,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_pages_are_concatenated_in_order() {
        let stub = StubS3::with_pages(vec![
            Ok(vec![object("a", 1), object("b", 2)]),
            Ok(vec![object("c", 3)]),
        ]);
        let adapter = S3Adapter::new(Arc::new(stub));
        let objects = adapter.list_objects(&ctx(), "mybucket").await.unwrap();
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_bucket_is_not_an_error() {
        let adapter = S3Adapter::new(Arc::new(StubS3::with_pages(vec![Ok(vec![])])));
        assert!(adapter.list_objects(&ctx(), "empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_page_discards_partial_results() {
        let stub = StubS3::with_pages(vec![
            Ok(vec![object("a", 1)]),
            Err("SlowDown".to_string()),
        ]);
        let adapter = S3Adapter::new(Arc::new(stub));
        let err = adapter.list_objects(&ctx(), "mybucket").await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { provider: "s3", .. }));
    }

    #[tokio::test]
    async fn test_list_buckets_preserves_order() {
        let stub = StubS3::with_buckets(vec!["zeta", "alpha"]);
        let adapter = S3Adapter::new(Arc::new(stub));
        let names: Vec<_> = adapter
            .list_buckets(&ctx())
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
