//! Provider client construction
//!
//! Handlers obtain providers through a `ClientFactory`. The SDK factory
//! builds each client on first use and shares it between requests; a failed
//! construction is retried by the next request.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{S3Config, VSphereConfig};
use crate::errors::{GatewayError, Result};
use crate::s3::{AwsS3Provider, S3Provider};
use crate::vsphere::{SoapClient, VSphereProvider};

#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn s3(&self) -> Result<Arc<dyn S3Provider>>;

    async fn vsphere(&self) -> Result<Arc<dyn VSphereProvider>>;
}

/// Factory for the AWS SDK and vim25 SOAP clients
pub struct SdkClientFactory {
    s3_config: S3Config,
    vsphere_config: VSphereConfig,
    s3: OnceCell<Arc<dyn S3Provider>>,
    vsphere: OnceCell<Arc<dyn VSphereProvider>>,
}

impl SdkClientFactory {
    pub fn new(s3_config: S3Config, vsphere_config: VSphereConfig) -> Self {
        Self {
            s3_config,
            vsphere_config,
            s3: OnceCell::new(),
            vsphere: OnceCell::new(),
        }
    }
}

#[async_trait]
impl ClientFactory for SdkClientFactory {
    async fn s3(&self) -> Result<Arc<dyn S3Provider>> {
        let client = self
            .s3
            .get_or_init(|| async {
                let provider = AwsS3Provider::new(&self.s3_config).await;
                info!(region = %self.s3_config.region, "S3 client initialized");
                Arc::new(provider) as Arc<dyn S3Provider>
            })
            .await;
        Ok(client.clone())
    }

    async fn vsphere(&self) -> Result<Arc<dyn VSphereProvider>> {
        let client = self
            .vsphere
            .get_or_try_init(|| async {
                let endpoint = self.vsphere_config.endpoint()?.ok_or_else(|| {
                    GatewayError::Upstream {
                        provider: "vsphere",
                        detail: "no endpoint configured".to_string(),
                    }
                })?;
                let client = SoapClient::connect(
                    &endpoint,
                    self.vsphere_config.insecure_tls,
                    self.vsphere_config.verbose,
                )
                .await?;
                info!(
                    url = %endpoint.url,
                    user = %endpoint.user,
                    server = %client.about().full_name,
                    "vSphere session established"
                );
                Ok::<_, GatewayError>(Arc::new(client) as Arc<dyn VSphereProvider>)
            })
            .await?;
        Ok(client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_vsphere_is_upstream_failure() {
        let factory = SdkClientFactory::new(S3Config::default(), VSphereConfig::default());
        let err = factory.vsphere().await.err().unwrap();
        assert_eq!(err.tag(), "UpstreamFailure");
        assert!(err.detail().contains("no endpoint configured"));
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let config = VSphereConfig {
            url: Some("http://127.0.0.1:1/sdk".to_string()),
            user: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let factory = SdkClientFactory::new(S3Config::default(), config);
        assert!(factory.vsphere().await.is_err());
        assert!(factory.vsphere.get().is_none());
        let err = factory.vsphere().await.err().unwrap();
        assert!(!err.detail().contains("secret"));
    }
}
