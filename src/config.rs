//! Configuration management for the inventory gateway
//!
//! Supports configuration via:
//! - Environment variables (primary)
//! - Optional TOML config file (secondary)
//!
//! Environment variables take precedence over config file values.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

use crate::errors::{GatewayError, Result};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional separate listener for Prometheus metrics
    #[serde(default)]
    pub metrics_address: Option<SocketAddr>,

    /// Default deadline for each provider call in seconds (default: 30)
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Datacenters, and hosts within a datacenter, described concurrently
    /// by one inventory request (default: 8)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_address: None,
            deadline_secs: default_deadline_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// S3 configuration. Credentials come from the default AWS provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region (default: us-west-2)
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint URL for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
        }
    }
}

/// vSphere endpoint configuration
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct VSphereConfig {
    /// SDK endpoint, e.g. https://vcenter.example.com/sdk
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Inventory path searched for datacenters when a request has none
    #[serde(default)]
    pub dc_path: String,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_tls: bool,

    /// Log every assembled inventory record at info level
    #[serde(default)]
    pub verbose: bool,
}

/// Endpoint and credentials resolved from a `VSphereConfig`
#[derive(Clone)]
pub struct VSphereEndpoint {
    /// SDK URL with any user info removed
    pub url: Url,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for VSphereEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VSphereEndpoint")
            .field("url", &self.url.as_str())
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl VSphereConfig {
    /// Resolve the SDK URL and credentials.
    ///
    /// Explicitly configured `user`/`password` win over credentials embedded
    /// in the URL; embedded credentials are used only for the parts not set
    /// explicitly. The returned URL never carries user info.
    pub fn endpoint(&self) -> Result<Option<VSphereEndpoint>> {
        let Some(raw) = self.url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let mut url = Url::parse(raw)
            .map_err(|e| GatewayError::Config(format!("invalid vSphere URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "unsupported vSphere URL scheme '{}'",
                url.scheme()
            )));
        }

        let embedded_user = decode_user_info(url.username());
        let embedded_password = url.password().map(decode_user_info).unwrap_or_default();
        let user = self
            .user
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or(embedded_user);
        let password = self
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or(embedded_password);

        // set_username/set_password only fail for cannot-be-a-base URLs
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Some(VSphereEndpoint { url, user, password }))
    }
}

fn decode_user_info(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

impl fmt::Debug for VSphereConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = self.url.as_deref().map(redact_url);
        f.debug_struct("VSphereConfig")
            .field("url", &url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dc_path", &self.dc_path)
            .field("insecure_tls", &self.insecure_tls)
            .field("verbose", &self.verbose)
            .finish()
    }
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<unparsable>".to_string(),
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub s3: S3Config,

    #[serde(default)]
    pub vsphere: VSphereConfig,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            s3: S3Config::default(),
            vsphere: VSphereConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - INVENTORY_CONFIG_FILE: optional path to TOML config file
    /// - INVENTORY_BIND_ADDRESS: server bind address (default: 0.0.0.0:8080)
    /// - INVENTORY_METRICS_ADDRESS: metrics listener address (optional)
    /// - INVENTORY_DEADLINE_SECS: default provider call deadline (default: 30)
    /// - INVENTORY_MAX_CONCURRENCY: concurrent datacenter/host descriptions (default: 8)
    /// - INVENTORY_S3_REGION: AWS region (default: us-west-2)
    /// - INVENTORY_S3_ENDPOINT: custom S3 endpoint URL (optional)
    /// - INVENTORY_VSPHERE_URL: vCenter/ESXi SDK URL (optional)
    /// - INVENTORY_VSPHERE_USER / INVENTORY_VSPHERE_PASSWORD: credentials
    /// - INVENTORY_VSPHERE_DC_PATH: default datacenter search path
    /// - INVENTORY_VSPHERE_INSECURE_TLS: skip certificate checks (true/false)
    /// - INVENTORY_VSPHERE_VERBOSE: verbose inventory tracing (true/false)
    /// - INVENTORY_LOG_LEVEL: log level (default: info)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match var("INVENTORY_CONFIG_FILE") {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(addr) = var("INVENTORY_BIND_ADDRESS") {
            config.server.bind_address = parse_var("INVENTORY_BIND_ADDRESS", &addr)?;
        }

        if let Some(addr) = var("INVENTORY_METRICS_ADDRESS") {
            config.server.metrics_address = Some(parse_var("INVENTORY_METRICS_ADDRESS", &addr)?);
        }

        if let Some(secs) = var("INVENTORY_DEADLINE_SECS") {
            config.server.deadline_secs = parse_var("INVENTORY_DEADLINE_SECS", &secs)?;
        }

        if let Some(limit) = var("INVENTORY_MAX_CONCURRENCY") {
            config.server.max_concurrency = parse_var("INVENTORY_MAX_CONCURRENCY", &limit)?;
        }

        if let Some(region) = var("INVENTORY_S3_REGION") {
            config.s3.region = region;
        }

        if let Some(endpoint) = var("INVENTORY_S3_ENDPOINT") {
            config.s3.endpoint = Some(endpoint);
        }

        if let Some(url) = var("INVENTORY_VSPHERE_URL") {
            config.vsphere.url = Some(url);
        }

        if let Some(user) = var("INVENTORY_VSPHERE_USER") {
            config.vsphere.user = Some(user);
        }

        if let Some(password) = var("INVENTORY_VSPHERE_PASSWORD") {
            config.vsphere.password = Some(password);
        }

        if let Some(path) = var("INVENTORY_VSPHERE_DC_PATH") {
            config.vsphere.dc_path = path;
        }

        if let Some(flag) = var("INVENTORY_VSPHERE_INSECURE_TLS") {
            config.vsphere.insecure_tls = parse_var("INVENTORY_VSPHERE_INSECURE_TLS", &flag)?;
        }

        if let Some(flag) = var("INVENTORY_VSPHERE_VERBOSE") {
            config.vsphere.verbose = parse_var("INVENTORY_VSPHERE_VERBOSE", &flag)?;
        }

        if let Some(level) = var("INVENTORY_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("cannot read {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("cannot parse {}: {}", path, e)))
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.server.deadline_secs == 0 {
            return Err(GatewayError::Config("deadline_secs must be positive".into()));
        }
        if self.server.max_concurrency == 0 {
            return Err(GatewayError::Config("max_concurrency must be positive".into()));
        }
        if self.s3.region.is_empty() {
            return Err(GatewayError::Config("S3 region must not be empty".into()));
        }
        self.vsphere.endpoint()?;
        Ok(())
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.server.deadline_secs)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| GatewayError::Config(format!("{}: {}", name, e)))
}
