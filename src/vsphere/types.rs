//! vSphere inventory types: references, property bags and output records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Provider-assigned identifier of an inventory object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedObjectReference {
    pub kind: String,
    pub value: String,
}

impl ManagedObjectReference {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Read a `{"type": .., "value": ..}` JSON object
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let id = value.get("value")?.as_str()?;
        Some(Self::new(kind, id))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "type": self.kind, "value": self.value })
    }
}

impl fmt::Display for ManagedObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Properties returned for one object by the property collector.
///
/// Property names may be dotted (`config.network`); lookups resolve a path
/// against the longest property name that prefixes it and walk the rest of
/// the path through nested JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyBag {
    pub obj: ManagedObjectReference,
    pub props: Map<String, Value>,
}

impl PropertyBag {
    pub fn new(obj: ManagedObjectReference) -> Self {
        Self {
            obj,
            props: Map::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.props.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.props.get(path) {
            return Some(v);
        }
        let (name, rest) = self
            .props
            .keys()
            .filter_map(|name| {
                path.strip_prefix(name.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .map(|rest| (name, rest))
            })
            .max_by_key(|(name, _)| name.len())?;
        rest.split('.')
            .try_fold(self.props.get(name)?, |value, segment| value.get(segment))
    }

    pub fn str(&self, path: &str) -> Option<String> {
        self.get(path).and_then(value_str)
    }

    pub fn i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(value_i64)
    }

    pub fn bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(value_bool)
    }

    pub fn moref(&self, path: &str) -> Option<ManagedObjectReference> {
        self.get(path).and_then(ManagedObjectReference::from_value)
    }

    pub fn timestamp(&self, path: &str) -> Option<DateTime<Utc>> {
        self.str(path)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Values at `path` as a list; a single value is a list of one
    pub fn list(&self, path: &str) -> Vec<&Value> {
        self.get(path).map(as_list).unwrap_or_default()
    }
}

pub fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

pub fn value_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An inventory object found by a path lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryObject {
    pub reference: ManagedObjectReference,
    pub name: String,
    pub inventory_path: String,
}

/// A reference together with its display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedReference {
    pub name: String,
    pub reference: ManagedObjectReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPath {
    pub reference: ManagedObjectReference,
    pub inventory_path: String,
}

/// The four top-level folders of a datacenter. Inventory paths are relative
/// to the datacenter's parent folder, e.g. `/DC1/host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatacenterFolders {
    pub vm: FolderPath,
    pub host: FolderPath,
    pub datastore: FolderPath,
    pub network: FolderPath,
}

/// Server `about` information reported at connect time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AboutInfo {
    pub full_name: String,
    pub version: String,
    pub api_type: String,
    pub instance_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostRecord {
    pub name: String,
    pub inventory_path: String,
    pub overall_status: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub memory_bytes: Option<i64>,
    pub cpu_model: Option<String>,
    pub cpu_mhz: Option<i64>,
    pub cores: Option<i64>,
    pub threads: Option<i64>,
    pub power_state: Option<String>,
    pub boot_time: Option<DateTime<Utc>>,
    pub in_maintenance: Option<bool>,
    pub product_name: Option<String>,
    #[serde(rename = "ManagementIPs")]
    pub management_ips: Vec<String>,
    pub resource_pool_name: Option<String>,
    pub resource_pool_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatastoreRecord {
    pub name: String,
    pub inventory_path: String,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    pub url: Option<String>,
    pub capacity: Option<i64>,
    pub free_space: Option<i64>,
    pub multiple_host_access: bool,
    pub overall_status: Option<String>,
    pub parent_ref: Option<String>,
    pub supports_directory_hierarchy: Option<bool>,
    pub native_snapshots: Option<bool>,
    pub per_file_thin_provisioning: Option<bool>,
    pub raw_disk_mappings: Option<bool>,
    #[serde(rename = "StorageIORM")]
    pub storage_iorm: Option<bool>,
    pub sparse_files: Option<bool>,
    pub max_file_size: Option<i64>,
    pub max_virtual_disk_capacity: Option<i64>,
    pub max_memory_file_size: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatacenterRecord {
    pub name: String,
    pub inventory_path: String,
    pub parent_folder_name: String,
    pub overall_status: Option<String>,
    pub vm_folder_path: String,
    pub host_folder_path: String,
    pub datastore_folder_path: String,
    pub network_folder_path: String,
    pub hosts: Vec<HostRecord>,
    pub datastores: Vec<DatastoreRecord>,
}

/// A datacenter that could not be described
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatacenterFailure {
    pub datacenter: String,
    pub inventory_path: String,
    pub error: String,
    pub detail: String,
}
