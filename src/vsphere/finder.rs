//! Inventory path resolution
//!
//! Paths are slash-separated, resolved from the root folder, and each
//! component is a glob pattern (`*`, `?`, `[...]`) matched case-sensitively
//! against object names. Traversal follows:
//! - Folder, StoragePod: `childEntity`
//! - Datacenter: its `vm`, `host`, `datastore` and `network` folders
//! - ComputeResource, ClusterComputeResource: `host`

use glob::Pattern;
use std::collections::HashMap;

use crate::vsphere::{InventoryObject, ManagedObjectReference, PropertyBag, VSphereError, VSphereProvider};

const DATACENTER_FOLDERS: [(&str, &str); 4] = [
    ("vmFolder", "vm"),
    ("hostFolder", "host"),
    ("datastoreFolder", "datastore"),
    ("networkFolder", "network"),
];

/// Objects whose inventory path matches `pattern`
pub(crate) async fn find<P>(provider: &P, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError>
where
    P: VSphereProvider + ?Sized,
{
    let mut current = vec![InventoryObject {
        reference: provider.root_folder().clone(),
        name: String::new(),
        inventory_path: "/".to_string(),
    }];

    for component in pattern.split('/').filter(|c| !c.is_empty()) {
        let component = compile(component)?;
        let mut next = Vec::new();
        for parent in &current {
            next.extend(
                children(provider, parent)
                    .await?
                    .into_iter()
                    .filter(|child| component.matches(&child.name)),
            );
        }
        current = next;
    }

    Ok(current)
}

/// Direct children of an inventory object in server listing order
pub(crate) async fn children<P>(
    provider: &P,
    parent: &InventoryObject,
) -> Result<Vec<InventoryObject>, VSphereError>
where
    P: VSphereProvider + ?Sized,
{
    match parent.reference.kind.as_str() {
        "Folder" | "StoragePod" => named_children(provider, parent, "childEntity").await,
        "ComputeResource" | "ClusterComputeResource" => named_children(provider, parent, "host").await,
        "Datacenter" => {
            let properties: Vec<&str> = DATACENTER_FOLDERS.iter().map(|(p, _)| *p).collect();
            let bag = properties_of(provider, &parent.reference, &properties).await?;
            Ok(DATACENTER_FOLDERS
                .iter()
                .filter_map(|(property, name)| {
                    bag.moref(property).map(|reference| InventoryObject {
                        reference,
                        name: name.to_string(),
                        inventory_path: child_path(&parent.inventory_path, name),
                    })
                })
                .collect())
        }
        _ => Ok(Vec::new()),
    }
}

async fn named_children<P>(
    provider: &P,
    parent: &InventoryObject,
    property: &str,
) -> Result<Vec<InventoryObject>, VSphereError>
where
    P: VSphereProvider + ?Sized,
{
    let bag = properties_of(provider, &parent.reference, &[property]).await?;
    let refs: Vec<ManagedObjectReference> = bag
        .list(property)
        .into_iter()
        .filter_map(ManagedObjectReference::from_value)
        .collect();
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    // One batched name lookup, re-keyed to keep the parent's listing order
    let names: HashMap<ManagedObjectReference, String> = provider
        .retrieve_properties(&refs, &["name"])
        .await?
        .into_iter()
        .filter_map(|bag| {
            let name = bag.str("name")?;
            Some((bag.obj, name))
        })
        .collect();

    refs.into_iter()
        .map(|reference| {
            let name = names
                .get(&reference)
                .cloned()
                .ok_or_else(|| VSphereError::MissingObject(reference.to_string()))?;
            Ok(InventoryObject {
                inventory_path: child_path(&parent.inventory_path, &name),
                reference,
                name,
            })
        })
        .collect()
}

/// Properties of a single object
pub(crate) async fn properties_of<P>(
    provider: &P,
    reference: &ManagedObjectReference,
    properties: &[&str],
) -> Result<PropertyBag, VSphereError>
where
    P: VSphereProvider + ?Sized,
{
    provider
        .retrieve_properties(std::slice::from_ref(reference), properties)
        .await?
        .into_iter()
        .find(|bag| &bag.obj == reference)
        .ok_or_else(|| VSphereError::MissingObject(reference.to_string()))
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn compile(component: &str) -> Result<Pattern, VSphereError> {
    Pattern::new(component).map_err(|e| VSphereError::InvalidPath {
        path: component.to_string(),
        reason: e.msg.to_string(),
    })
}
