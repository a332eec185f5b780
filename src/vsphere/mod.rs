//! vSphere inventory adapter
//!
//! Provides a provider abstraction over a vCenter/ESXi SDK endpoint and the
//! adapter that assembles datacenter trees from it:
//! - `soap`: vim25 SOAP provider used in production
//! - `finder`: inventory path resolution for the SOAP provider
//! - `adapter`: datacenter, host and datastore record assembly

mod adapter;
mod finder;
mod soap;
mod types;
mod xml;

use async_trait::async_trait;
use thiserror::Error;

pub use adapter::VSphereAdapter;
pub use soap::SoapClient;
pub use types::{
    AboutInfo, DatacenterFailure, DatacenterFolders, DatacenterRecord, DatastoreRecord, FolderPath,
    HostRecord, InventoryObject, ManagedObjectReference, NamedReference, PropertyBag,
};

/// Errors raised by vSphere providers
#[derive(Error, Debug)]
pub enum VSphereError {
    /// Transport failure talking to the SDK endpoint
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a SOAP fault
    #[error("server fault {code}: {message}")]
    Fault { code: String, message: String },

    /// Non-success HTTP status without a SOAP fault
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Response body could not be parsed
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A requested object was absent from the property collector result
    #[error("no properties returned for {0}")]
    MissingObject(String),

    /// A required property was absent
    #[error("{object} has no {property} property")]
    MissingProperty { object: String, property: String },

    /// An inventory path component is not a valid pattern
    #[error("invalid inventory path component '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl From<reqwest::Error> for VSphereError {
    fn from(err: reqwest::Error) -> Self {
        // The endpoint URL is stripped of credentials, but keep it out anyway
        VSphereError::Transport(err.without_url().to_string())
    }
}

/// vSphere provider operations used by the adapter
///
/// `retrieve_properties` does not preserve the order of `refs`; callers
/// that need listing order must re-key the result by reference.
#[async_trait]
pub trait VSphereProvider: Send + Sync {
    /// Root folder of the inventory
    fn root_folder(&self) -> &ManagedObjectReference;

    /// Datacenters matching an inventory path
    async fn list_datacenters(&self, path: &str) -> Result<Vec<InventoryObject>, VSphereError>;

    /// Name of a folder
    async fn describe_folder(
        &self,
        folder: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError>;

    /// The vm/host/datastore/network folders of a datacenter
    async fn datacenter_folders(
        &self,
        datacenter: &ManagedObjectReference,
    ) -> Result<DatacenterFolders, VSphereError>;

    /// Hosts matching an inventory path pattern
    async fn list_hosts(&self, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError>;

    /// Datastores matching an inventory path pattern
    async fn list_datastores(&self, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError>;

    /// Batched property retrieval; an empty `properties` requests all of them
    async fn retrieve_properties(
        &self,
        refs: &[ManagedObjectReference],
        properties: &[&str],
    ) -> Result<Vec<PropertyBag>, VSphereError>;

    /// IP addresses of the host's management VMkernel adapters
    async fn management_ips(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<Vec<String>, VSphereError>;

    /// Root resource pool of the host's compute resource
    async fn resource_pool(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError>;
}
