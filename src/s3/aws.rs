//! AWS S3 provider implementation
//!
//! Uses the AWS SDK for Rust. Credentials are resolved through the default
//! AWS credential chain:
//! - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
//! - Shared config/credentials files
//! - IRSA role annotations in Kubernetes
//! - EC2 instance metadata / ECS task role

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::DateTime as SdkDateTime;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::S3Config;
use crate::s3::{BucketDescription, ObjectDescription, ObjectPage, S3Error, S3Provider};

/// S3 provider backed by an SDK client
pub struct AwsS3Provider {
    client: Client,
}

impl AwsS3Provider {
    /// Create a new provider for the configured region and endpoint
    pub async fn new(config: &S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        // S3-compatible services such as MinIO need path-style addressing
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        debug!(region = %config.region, endpoint = ?config.endpoint, "S3 client configured");
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn to_chrono(ts: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

#[async_trait]
impl S3Provider for AwsS3Provider {
    async fn list_buckets(&self) -> Result<Vec<BucketDescription>, S3Error> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| S3Error::Sdk {
                operation: "ListBuckets",
                detail: DisplayErrorContext(&e).to_string(),
            })?;

        output
            .buckets()
            .iter()
            .map(|bucket| {
                let name = bucket.name().ok_or(S3Error::Incomplete {
                    operation: "ListBuckets",
                    field: "Name",
                })?;
                Ok(BucketDescription {
                    name: name.to_string(),
                    creation_date: bucket.creation_date().and_then(to_chrono),
                })
            })
            .collect()
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, S3Error> {
        let mut request = self.client.list_objects_v2().bucket(bucket);
        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let output = request.send().await.map_err(|e| S3Error::Sdk {
            operation: "ListObjectsV2",
            detail: DisplayErrorContext(&e).to_string(),
        })?;

        let objects = output
            .contents()
            .iter()
            .map(|obj| {
                let key = obj.key().ok_or(S3Error::Incomplete {
                    operation: "ListObjectsV2",
                    field: "Key",
                })?;
                Ok(ObjectDescription {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                    last_modified: obj.last_modified().and_then(to_chrono),
                })
            })
            .collect::<Result<Vec<_>, S3Error>>()?;

        // The last page either is not truncated or carries no continuation token
        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }
}
