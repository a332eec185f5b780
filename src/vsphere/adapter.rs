//! Datacenter tree assembly on top of a `VSphereProvider`

use futures::stream::{self, StreamExt, TryStreamExt};
use glob::Pattern;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::errors::{GatewayError, Result};
use crate::vsphere::types::value_str;
use crate::vsphere::{
    DatacenterFailure, DatacenterRecord, DatastoreRecord, HostRecord, InventoryObject,
    ManagedObjectReference, PropertyBag, VSphereError, VSphereProvider,
};

const PROVIDER: &str = "vsphere";

const HOST_PROPERTIES: &[&str] = &["hardware", "overallStatus", "summary"];

const DATASTORE_PROPERTIES: &[&str] = &["info", "summary", "capability", "parent", "overallStatus"];

pub struct VSphereAdapter {
    provider: Arc<dyn VSphereProvider>,
    verbose: bool,
    /// Upper bound on datacenters, and on hosts per datacenter, in flight
    concurrency: usize,
}

impl VSphereAdapter {
    pub fn new(provider: Arc<dyn VSphereProvider>, verbose: bool, concurrency: usize) -> Self {
        Self {
            provider,
            verbose,
            concurrency: concurrency.max(1),
        }
    }

    async fn list_datacenters(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<Vec<InventoryObject>> {
        let datacenters = ctx
            .call(PROVIDER, "list_datacenters", self.provider.list_datacenters(path))
            .await?;
        info!(path = %path, count = datacenters.len(), "Found datacenters");
        Ok(datacenters)
    }

    /// Describe every datacenter under `path`.
    ///
    /// Datacenters are described concurrently, at most `concurrency` at a
    /// time, and independently; a failed
    /// datacenter is reported as a `DatacenterFailure` unless every one of
    /// them failed, in which case the first error is returned. Cancellation
    /// always aborts the whole inventory.
    pub async fn describe_inventory(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<(Vec<DatacenterRecord>, Vec<DatacenterFailure>)> {
        let datacenters = self.list_datacenters(ctx, path).await?;
        let futures: Vec<_> = datacenters
            .iter()
            .map(|dc| self.describe_datacenter(ctx, dc))
            .collect();
        let results: Vec<Result<DatacenterRecord>> = stream::iter(futures)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut records = Vec::new();
        let mut errors = Vec::new();
        for (dc, result) in datacenters.iter().zip(results) {
            match result {
                Ok(record) => records.push(record),
                Err(e) if e.is_canceled() => return Err(e),
                Err(e) => {
                    warn!(datacenter = %dc.name, error = %e, "Failed to describe datacenter");
                    errors.push((dc, e));
                }
            }
        }

        if records.is_empty() {
            if let Some((_, first)) = errors.into_iter().next() {
                return Err(first);
            }
            return Ok((records, Vec::new()));
        }

        let failures = errors
            .into_iter()
            .map(|(dc, e)| DatacenterFailure {
                datacenter: dc.name.clone(),
                inventory_path: dc.inventory_path.clone(),
                error: e.tag().to_string(),
                detail: e.detail(),
            })
            .collect();
        Ok((records, failures))
    }

    pub async fn describe_datacenter(
        &self,
        ctx: &RequestContext,
        dc: &InventoryObject,
    ) -> Result<DatacenterRecord> {
        let bag = self.properties_of(ctx, &dc.reference, &[]).await?;
        let parent = bag.moref("parent").ok_or_else(|| VSphereError::MissingProperty {
            object: dc.reference.to_string(),
            property: "parent".to_string(),
        })?;

        let parent_folder = ctx
            .call(PROVIDER, "describe_folder", self.provider.describe_folder(&parent))
            .await?;

        // Subfolder paths come back relative to the parent folder, so nested
        // datacenters need the parent's name in front of them.
        let prefix = if &parent == self.provider.root_folder() {
            String::new()
        } else {
            format!("/{}", parent_folder.name)
        };

        let folders = ctx
            .call(
                PROVIDER,
                "datacenter_folders",
                self.provider.datacenter_folders(&dc.reference),
            )
            .await?;

        debug!(
            datacenter = %dc.name,
            host_folder = %folders.host.reference,
            datastore_folder = %folders.datastore.reference,
            "Resolved datacenter folders"
        );

        let vm_folder_path = prefixed(&prefix, &folders.vm.inventory_path);
        let host_folder_path = prefixed(&prefix, &folders.host.inventory_path);
        let datastore_folder_path = prefixed(&prefix, &folders.datastore.inventory_path);
        let network_folder_path = prefixed(&prefix, &folders.network.inventory_path);

        let host_pattern = children_pattern(&host_folder_path);
        let host_objects = ctx
            .call(PROVIDER, "list_hosts", self.provider.list_hosts(&host_pattern))
            .await?;
        let host_futures: Vec<_> = host_objects
            .iter()
            .map(|host| self.describe_host(ctx, host))
            .collect();
        let hosts: Vec<HostRecord> = stream::iter(host_futures)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let datastore_pattern = children_pattern(&datastore_folder_path);
        let datastore_objects = ctx
            .call(
                PROVIDER,
                "list_datastores",
                self.provider.list_datastores(&datastore_pattern),
            )
            .await?;
        let datastores = self.describe_datastores(ctx, &datastore_objects).await?;

        let record = DatacenterRecord {
            name: bag.str("name").unwrap_or_else(|| dc.name.clone()),
            inventory_path: dc.inventory_path.clone(),
            parent_folder_name: parent_folder.name,
            overall_status: bag.str("overallStatus"),
            vm_folder_path,
            host_folder_path,
            datastore_folder_path,
            network_folder_path,
            hosts,
            datastores,
        };
        self.trace_record("datacenter", &record.name, &record.inventory_path);
        Ok(record)
    }

    pub async fn describe_host(
        &self,
        ctx: &RequestContext,
        host: &InventoryObject,
    ) -> Result<HostRecord> {
        let bag = self.properties_of(ctx, &host.reference, HOST_PROPERTIES).await?;
        let management_ips = ctx
            .call(
                PROVIDER,
                "management_ips",
                self.provider.management_ips(&host.reference),
            )
            .await?;
        let pool = ctx
            .call(
                PROVIDER,
                "resource_pool",
                self.provider.resource_pool(&host.reference),
            )
            .await?;

        let cpu_model = bag
            .list("hardware.cpuPkg")
            .first()
            .and_then(|pkg| pkg.get("description"))
            .and_then(value_str);

        let record = HostRecord {
            name: host.name.clone(),
            inventory_path: host.inventory_path.clone(),
            overall_status: bag.str("overallStatus"),
            vendor: bag.str("hardware.systemInfo.vendor"),
            model: bag.str("hardware.systemInfo.model"),
            memory_bytes: bag.i64("hardware.memorySize"),
            cpu_model,
            cpu_mhz: bag.i64("summary.hardware.cpuMhz"),
            cores: bag.i64("hardware.cpuInfo.numCpuCores"),
            threads: bag.i64("hardware.cpuInfo.numCpuThreads"),
            power_state: bag.str("summary.runtime.powerState"),
            boot_time: bag.timestamp("summary.runtime.bootTime"),
            in_maintenance: bag.bool("summary.runtime.inMaintenanceMode"),
            product_name: bag.str("summary.config.product.fullName"),
            management_ips,
            resource_pool_name: Some(pool.name),
            resource_pool_ref: Some(pool.reference.to_string()),
        };
        self.trace_record("host", &record.name, &record.inventory_path);
        Ok(record)
    }

    /// Describe datastores with a single batched property retrieval. The
    /// output follows the order of `datastores`, not the provider's.
    pub async fn describe_datastores(
        &self,
        ctx: &RequestContext,
        datastores: &[InventoryObject],
    ) -> Result<Vec<DatastoreRecord>> {
        if datastores.is_empty() {
            return Ok(Vec::new());
        }

        let refs: Vec<ManagedObjectReference> =
            datastores.iter().map(|ds| ds.reference.clone()).collect();
        let bags = ctx
            .call(
                PROVIDER,
                "retrieve_properties",
                self.provider.retrieve_properties(&refs, DATASTORE_PROPERTIES),
            )
            .await?;
        let by_ref: HashMap<ManagedObjectReference, PropertyBag> =
            bags.into_iter().map(|bag| (bag.obj.clone(), bag)).collect();

        datastores
            .iter()
            .map(|ds| -> Result<DatastoreRecord> {
                let bag = by_ref
                    .get(&ds.reference)
                    .ok_or_else(|| VSphereError::MissingObject(ds.reference.to_string()))?;
                let record = datastore_record(ds, bag);
                self.trace_record("datastore", &record.name, &record.inventory_path);
                Ok(record)
            })
            .collect()
    }

    async fn properties_of(
        &self,
        ctx: &RequestContext,
        reference: &ManagedObjectReference,
        properties: &[&str],
    ) -> Result<PropertyBag> {
        let refs = std::slice::from_ref(reference);
        let bags = ctx
            .call(
                PROVIDER,
                "retrieve_properties",
                self.provider.retrieve_properties(refs, properties),
            )
            .await?;
        bags.into_iter()
            .find(|bag| &bag.obj == reference)
            .ok_or_else(|| GatewayError::from(VSphereError::MissingObject(reference.to_string())))
    }

    fn trace_record(&self, kind: &'static str, name: &str, inventory_path: &str) {
        if self.verbose {
            info!(kind, name, inventory_path, "Assembled inventory record");
        } else {
            debug!(kind, name, inventory_path, "Assembled inventory record");
        }
    }
}

fn datastore_record(ds: &InventoryObject, bag: &PropertyBag) -> DatastoreRecord {
    DatastoreRecord {
        name: bag.str("summary.name").unwrap_or_else(|| ds.name.clone()),
        inventory_path: ds.inventory_path.clone(),
        kind: bag.str("summary.type"),
        url: bag.str("summary.url"),
        capacity: bag.i64("summary.capacity"),
        free_space: bag.i64("summary.freeSpace"),
        multiple_host_access: bag.bool("summary.multipleHostAccess").unwrap_or(false),
        overall_status: bag.str("overallStatus"),
        parent_ref: bag.moref("parent").map(|p| p.to_string()),
        supports_directory_hierarchy: bag.bool("capability.directoryHierarchySupported"),
        native_snapshots: bag.bool("capability.nativeSnapshotSupported"),
        per_file_thin_provisioning: bag.bool("capability.perFileThinProvisioningSupported"),
        raw_disk_mappings: bag.bool("capability.rawDiskMappingsSupported"),
        storage_iorm: bag.bool("capability.storageIORMSupported"),
        sparse_files: bag.bool("capability.seSparseSupported"),
        max_file_size: bag.i64("info.maxFileSize"),
        max_virtual_disk_capacity: bag.i64("info.maxVirtualDiskCapacity"),
        max_memory_file_size: bag.i64("info.maxMemoryFileSize"),
        timestamp: bag.timestamp("info.timestamp"),
    }
}

fn prefixed(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        join_path(&[prefix, path])
    }
}

/// Pattern for the direct children of a literal inventory path. Names are
/// escaped so wildcard characters in them match only themselves.
fn children_pattern(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(Pattern::escape)
        .collect();
    format!("/{}/*", segments.join("/"))
}

/// Join inventory path fragments with single slashes
fn join_path(parts: &[&str]) -> String {
    let segments: Vec<&str> = parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}
