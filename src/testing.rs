//! In-memory providers for unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clients::ClientFactory;
use crate::errors::GatewayError;
use crate::s3::{BucketDescription, ObjectDescription, ObjectPage, S3Error, S3Provider};
use crate::vsphere::{
    DatacenterFolders, FolderPath, InventoryObject, ManagedObjectReference, NamedReference,
    PropertyBag, VSphereError, VSphereProvider,
};

/// S3 provider serving fixed buckets and pages. Page `n` is requested with
/// the continuation token `page-n`.
#[derive(Default)]
pub struct StubS3 {
    buckets: Vec<BucketDescription>,
    pages: Vec<Result<Vec<ObjectDescription>, String>>,
    bucket: Option<String>,
    delay: Option<Duration>,
}

impl StubS3 {
    pub fn with_buckets(names: Vec<&str>) -> Self {
        Self::with_bucket_descriptions(
            names
                .into_iter()
                .map(|name| BucketDescription {
                    name: name.to_string(),
                    creation_date: None,
                })
                .collect(),
        )
    }

    pub fn with_bucket_descriptions(buckets: Vec<BucketDescription>) -> Self {
        Self {
            buckets,
            ..Default::default()
        }
    }

    pub fn with_pages(pages: Vec<Result<Vec<ObjectDescription>, String>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    /// Serve pages only for `bucket`; any other name is NoSuchBucket
    pub fn for_bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl S3Provider for StubS3 {
    async fn list_buckets(&self) -> Result<Vec<BucketDescription>, S3Error> {
        self.pause().await;
        Ok(self.buckets.clone())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, S3Error> {
        self.pause().await;
        if self.bucket.as_deref().map_or(false, |expected| expected != bucket) {
            return Err(S3Error::Sdk {
                operation: "ListObjectsV2",
                detail: format!("NoSuchBucket: {}", bucket),
            });
        }
        let index = token
            .as_deref()
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        match self.pages.get(index) {
            Some(Ok(objects)) => Ok(ObjectPage {
                objects: objects.clone(),
                next_token: (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1)),
            }),
            Some(Err(detail)) => Err(S3Error::Sdk {
                operation: "ListObjectsV2",
                detail: detail.clone(),
            }),
            None => Ok(ObjectPage::default()),
        }
    }
}

struct StubDatacenter {
    name: String,
    reference: ManagedObjectReference,
    parent: Option<String>,
    hosts: Vec<String>,
    datastores: Vec<String>,
}

impl StubDatacenter {
    fn inventory_path(&self) -> String {
        match &self.parent {
            Some(parent) => format!("/{}/{}", parent, self.name),
            None => format!("/{}", self.name),
        }
    }
}

/// vSphere provider over a handful of datacenters.
///
/// References are derived from names (`Datacenter:datacenter-DC1`,
/// `HostSystem:host-H1`, `Datastore:datastore-D1`). Batched property
/// retrievals come back rotated by one to mimic an unordered collector.
pub struct StubVSphere {
    root: ManagedObjectReference,
    datacenters: Vec<StubDatacenter>,
    bags: HashMap<ManagedObjectReference, PropertyBag>,
    management_ips: HashMap<ManagedObjectReference, Vec<String>>,
    failing: HashSet<ManagedObjectReference>,
    patterns: Mutex<Vec<String>>,
    delay: Option<Duration>,
    host_latency: Option<Duration>,
    host_calls: AtomicUsize,
    peak_host_calls: AtomicUsize,
}

impl StubVSphere {
    pub fn new() -> Self {
        let root = ManagedObjectReference::new("Folder", "group-d1");
        let mut bags = HashMap::new();
        bags.insert(
            root.clone(),
            PropertyBag::new(root.clone()).with("name", json!("Datacenters")),
        );
        Self {
            root,
            datacenters: Vec::new(),
            bags,
            management_ips: HashMap::new(),
            failing: HashSet::new(),
            patterns: Mutex::new(Vec::new()),
            delay: None,
            host_latency: None,
            host_calls: AtomicUsize::new(0),
            peak_host_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_datacenter(
        &mut self,
        name: &str,
        parent: Option<&str>,
        hosts: &[&str],
        datastores: &[&str],
    ) {
        let reference = ManagedObjectReference::new("Datacenter", format!("datacenter-{}", name));
        let parent_ref = match parent {
            Some(folder) => {
                let folder_ref = ManagedObjectReference::new("Folder", format!("group-{}", folder));
                self.bags.insert(
                    folder_ref.clone(),
                    PropertyBag::new(folder_ref.clone()).with("name", json!(folder)),
                );
                folder_ref
            }
            None => self.root.clone(),
        };

        self.bags.insert(
            reference.clone(),
            PropertyBag::new(reference.clone())
                .with("name", json!(name))
                .with("overallStatus", json!("green"))
                .with("parent", parent_ref.to_value()),
        );

        for (i, host) in hosts.iter().enumerate() {
            let host_ref = host_ref(host);
            self.bags.insert(
                host_ref.clone(),
                PropertyBag::new(host_ref.clone())
                    .with("overallStatus", json!("green"))
                    .with(
                        "hardware",
                        json!({
                            "systemInfo": {"vendor": "Dell Inc.", "model": "PowerEdge R640"},
                            "memorySize": 274_877_906_944i64,
                            "cpuInfo": {"numCpuCores": 16, "numCpuThreads": 32},
                            "cpuPkg": [{"description": "Intel(R) Xeon(R) Gold 6130"}]
                        }),
                    )
                    .with(
                        "summary",
                        json!({
                            "hardware": {"cpuMhz": 2100},
                            "runtime": {
                                "powerState": "poweredOn",
                                "inMaintenanceMode": false,
                                "bootTime": "2024-01-15T08:30:00Z"
                            },
                            "config": {"product": {"fullName": "VMware ESXi 7.0.3"}}
                        }),
                    ),
            );
            self.management_ips
                .insert(host_ref, vec![format!("10.0.0.{}", i + 1)]);
        }

        for (i, datastore) in datastores.iter().enumerate() {
            let ds_ref = datastore_ref(datastore);
            self.bags.insert(
                ds_ref.clone(),
                PropertyBag::new(ds_ref.clone())
                    .with("overallStatus", json!("green"))
                    .with("parent", json!({"type": "Folder", "value": format!("datastore-{}", name)}))
                    .with(
                        "summary",
                        json!({
                            "name": datastore,
                            "type": "VMFS",
                            "url": format!("ds:///vmfs/volumes/{}/", datastore),
                            "capacity": (i as i64 + 1) * 1024,
                            "freeSpace": 512,
                            "multipleHostAccess": true
                        }),
                    )
                    .with(
                        "capability",
                        json!({
                            "directoryHierarchySupported": true,
                            "nativeSnapshotSupported": false,
                            "perFileThinProvisioningSupported": true,
                            "rawDiskMappingsSupported": true,
                            "storageIORMSupported": true,
                            "seSparseSupported": true
                        }),
                    )
                    .with(
                        "info",
                        json!({
                            "maxFileSize": 70_368_744_177_664i64,
                            "maxVirtualDiskCapacity": 68_169_720_922_112i64,
                            "maxMemoryFileSize": 70_368_744_177_664i64,
                            "timestamp": "2024-03-01T10:00:00Z"
                        }),
                    ),
            );
        }

        self.datacenters.push(StubDatacenter {
            name: name.to_string(),
            reference,
            parent: parent.map(String::from),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            datastores: datastores.iter().map(|d| d.to_string()).collect(),
        });
    }

    /// Fail any property retrieval that includes `reference`
    pub fn fail_on(&mut self, reference: ManagedObjectReference) {
        self.failing.insert(reference);
    }

    /// Delay datacenter listing
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay each management IP lookup, tracking how many overlap
    pub fn with_host_latency(mut self, latency: Duration) -> Self {
        self.host_latency = Some(latency);
        self
    }

    /// Most management IP lookups seen in flight at once
    pub fn peak_host_calls(&self) -> usize {
        self.peak_host_calls.load(Ordering::SeqCst)
    }

    /// Host and datastore patterns requested so far
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.lock().unwrap().clone()
    }

    fn record(&self, pattern: &str) {
        self.patterns.lock().unwrap().push(pattern.to_string());
    }

    fn datacenter(&self, reference: &ManagedObjectReference) -> Result<&StubDatacenter, VSphereError> {
        self.datacenters
            .iter()
            .find(|dc| &dc.reference == reference)
            .ok_or_else(|| VSphereError::MissingObject(reference.to_string()))
    }
}

fn host_ref(name: &str) -> ManagedObjectReference {
    ManagedObjectReference::new("HostSystem", format!("host-{}", name))
}

fn datastore_ref(name: &str) -> ManagedObjectReference {
    ManagedObjectReference::new("Datastore", format!("datastore-{}", name))
}

fn listed(parent: &str, names: &[String], make_ref: fn(&str) -> ManagedObjectReference) -> Vec<InventoryObject> {
    names
        .iter()
        .map(|name| InventoryObject {
            reference: make_ref(name),
            name: name.clone(),
            inventory_path: format!("{}/{}", parent, name),
        })
        .collect()
}

#[async_trait]
impl VSphereProvider for StubVSphere {
    fn root_folder(&self) -> &ManagedObjectReference {
        &self.root
    }

    async fn list_datacenters(&self, path: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let path = path.trim_end_matches('/');
        Ok(self
            .datacenters
            .iter()
            .filter(|dc| {
                let full = dc.inventory_path();
                path.is_empty()
                    || path == "*"
                    || full == path
                    || full.starts_with(&format!("{}/", path))
            })
            .map(|dc| InventoryObject {
                reference: dc.reference.clone(),
                name: dc.name.clone(),
                inventory_path: dc.inventory_path(),
            })
            .collect())
    }

    async fn describe_folder(
        &self,
        folder: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError> {
        let name = self
            .bags
            .get(folder)
            .and_then(|bag| bag.str("name"))
            .ok_or_else(|| VSphereError::MissingObject(folder.to_string()))?;
        Ok(NamedReference {
            name,
            reference: folder.clone(),
        })
    }

    async fn datacenter_folders(
        &self,
        datacenter: &ManagedObjectReference,
    ) -> Result<DatacenterFolders, VSphereError> {
        let dc = self.datacenter(datacenter)?;
        let folder = |leaf: &str| FolderPath {
            reference: ManagedObjectReference::new("Folder", format!("{}-{}", leaf, dc.name)),
            inventory_path: format!("/{}/{}", dc.name, leaf),
        };
        Ok(DatacenterFolders {
            vm: folder("vm"),
            host: folder("host"),
            datastore: folder("datastore"),
            network: folder("network"),
        })
    }

    async fn list_hosts(&self, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        self.record(pattern);
        Ok(self
            .datacenters
            .iter()
            .filter(|dc| format!("{}/host/*", dc.inventory_path()) == pattern)
            .flat_map(|dc| listed(&format!("{}/host", dc.inventory_path()), &dc.hosts, host_ref))
            .collect())
    }

    async fn list_datastores(&self, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        self.record(pattern);
        Ok(self
            .datacenters
            .iter()
            .filter(|dc| format!("{}/datastore/*", dc.inventory_path()) == pattern)
            .flat_map(|dc| {
                listed(
                    &format!("{}/datastore", dc.inventory_path()),
                    &dc.datastores,
                    datastore_ref,
                )
            })
            .collect())
    }

    async fn retrieve_properties(
        &self,
        refs: &[ManagedObjectReference],
        _properties: &[&str],
    ) -> Result<Vec<PropertyBag>, VSphereError> {
        if let Some(bad) = refs.iter().find(|r| self.failing.contains(r)) {
            return Err(VSphereError::Fault {
                code: "ManagedObjectNotFound".into(),
                message: format!("The object '{}' has already been deleted", bad),
            });
        }
        let mut bags: Vec<PropertyBag> = refs.iter().filter_map(|r| self.bags.get(r).cloned()).collect();
        if bags.len() > 1 {
            bags.rotate_right(1);
        }
        Ok(bags)
    }

    async fn management_ips(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<Vec<String>, VSphereError> {
        if let Some(latency) = self.host_latency {
            let in_flight = self.host_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_host_calls.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.host_calls.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(self.management_ips.get(host).cloned().unwrap_or_default())
    }

    async fn resource_pool(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError> {
        Ok(NamedReference {
            name: "Resources".into(),
            reference: ManagedObjectReference::new("ResourcePool", format!("resgroup-{}", host.value)),
        })
    }
}

/// Raw inventory tree for exercising the path finder. Batched lookups are
/// answered in reverse order.
pub struct TreeProvider {
    root: ManagedObjectReference,
    bags: HashMap<ManagedObjectReference, PropertyBag>,
}

impl TreeProvider {
    pub fn new() -> Self {
        Self {
            root: ManagedObjectReference::new("Folder", "group-d1"),
            bags: HashMap::new(),
        }
    }

    pub fn folder(&mut self, id: &str, name: &str, children: &[(&str, &str)]) {
        let entities: Vec<Value> = children
            .iter()
            .map(|(kind, child)| ManagedObjectReference::new(*kind, *child).to_value())
            .collect();
        self.named("Folder", id, name);
        self.set("Folder", id, "childEntity", Value::Array(entities));
    }

    pub fn datacenter(&mut self, id: &str, name: &str) {
        self.named("Datacenter", id, name);
        for (property, leaf) in [
            ("vmFolder", "vm"),
            ("hostFolder", "host"),
            ("datastoreFolder", "datastore"),
            ("networkFolder", "network"),
        ] {
            let folder_id = format!("{}-{}", leaf, id);
            let folder = ManagedObjectReference::new("Folder", folder_id.clone());
            self.set("Datacenter", id, property, folder.to_value());
            if !self.bags.contains_key(&folder) {
                self.folder(&folder_id, leaf, &[]);
            }
        }
    }

    pub fn cluster(&mut self, id: &str, name: &str, hosts: &[&str]) {
        let hosts: Vec<Value> = hosts
            .iter()
            .map(|host| ManagedObjectReference::new("HostSystem", *host).to_value())
            .collect();
        self.named("ClusterComputeResource", id, name);
        self.set("ClusterComputeResource", id, "host", Value::Array(hosts));
    }

    pub fn named(&mut self, kind: &str, id: &str, name: &str) {
        self.set(kind, id, "name", json!(name));
    }

    fn set(&mut self, kind: &str, id: &str, property: &str, value: Value) {
        let reference = ManagedObjectReference::new(kind, id);
        self.bags
            .entry(reference.clone())
            .or_insert_with(|| PropertyBag::new(reference))
            .props
            .insert(property.to_string(), value);
    }
}

#[async_trait]
impl VSphereProvider for TreeProvider {
    fn root_folder(&self) -> &ManagedObjectReference {
        &self.root
    }

    async fn list_datacenters(&self, _path: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        Ok(Vec::new())
    }

    async fn describe_folder(
        &self,
        folder: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError> {
        Err(VSphereError::MissingObject(folder.to_string()))
    }

    async fn datacenter_folders(
        &self,
        datacenter: &ManagedObjectReference,
    ) -> Result<DatacenterFolders, VSphereError> {
        Err(VSphereError::MissingObject(datacenter.to_string()))
    }

    async fn list_hosts(&self, _pattern: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        Ok(Vec::new())
    }

    async fn list_datastores(&self, _pattern: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        Ok(Vec::new())
    }

    async fn retrieve_properties(
        &self,
        refs: &[ManagedObjectReference],
        _properties: &[&str],
    ) -> Result<Vec<PropertyBag>, VSphereError> {
        Ok(refs
            .iter()
            .rev()
            .filter_map(|r| self.bags.get(r).cloned())
            .collect())
    }

    async fn management_ips(
        &self,
        _host: &ManagedObjectReference,
    ) -> Result<Vec<String>, VSphereError> {
        Ok(Vec::new())
    }

    async fn resource_pool(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError> {
        Err(VSphereError::MissingObject(host.to_string()))
    }
}

/// Factory handing out fixed providers; a missing provider is reported as
/// an unconfigured upstream.
#[derive(Default)]
pub struct StubFactory {
    pub s3: Option<Arc<dyn S3Provider>>,
    pub vsphere: Option<Arc<dyn VSphereProvider>>,
}

impl StubFactory {
    pub fn with_s3(provider: impl S3Provider + 'static) -> Self {
        Self {
            s3: Some(Arc::new(provider)),
            vsphere: None,
        }
    }

    pub fn with_vsphere(provider: impl VSphereProvider + 'static) -> Self {
        Self {
            s3: None,
            vsphere: Some(Arc::new(provider)),
        }
    }
}

#[async_trait]
impl ClientFactory for StubFactory {
    async fn s3(&self) -> crate::errors::Result<Arc<dyn S3Provider>> {
        self.s3.clone().ok_or_else(|| GatewayError::Upstream {
            provider: "s3",
            detail: "no client configured".into(),
        })
    }

    async fn vsphere(&self) -> crate::errors::Result<Arc<dyn VSphereProvider>> {
        self.vsphere.clone().ok_or_else(|| GatewayError::Upstream {
            provider: "vsphere",
            detail: "no client configured".into(),
        })
    }
}
