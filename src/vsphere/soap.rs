//! vim25 SOAP provider
//!
//! Talks to the `/sdk` endpoint of vCenter or ESXi:
//! - `RetrieveServiceContent` for the root folder and collector references
//! - `Login` for a session cookie kept by the HTTP client, repeated once
//!   when the server reports the session as `NotAuthenticated`
//! - `RetrievePropertiesEx` / `ContinueRetrievePropertiesEx` for all reads

use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::VSphereEndpoint;
use crate::vsphere::finder::{self, properties_of};
use crate::vsphere::types::{as_list, value_str};
use crate::vsphere::xml::{self, XmlNode};
use crate::vsphere::{
    AboutInfo, DatacenterFolders, FolderPath, InventoryObject, ManagedObjectReference,
    NamedReference, PropertyBag, VSphereError, VSphereProvider,
};

const SOAP_ACTION: &str = "urn:vim25/6.5";

const MANAGEMENT_NETCONFIG: &str = "config.virtualNicManagerInfo.netConfig";

/// Fault code of a call made on an expired or missing session
const NOT_AUTHENTICATED: &str = "NotAuthenticated";

/// Session-holding client for one SDK endpoint
pub struct SoapClient {
    http: reqwest::Client,
    endpoint: VSphereEndpoint,
    root_folder: ManagedObjectReference,
    property_collector: ManagedObjectReference,
    session_manager: ManagedObjectReference,
    about: AboutInfo,
    /// Incremented by every successful re-login
    session: AtomicU64,
    login: Mutex<()>,
}

impl SoapClient {
    /// Retrieve the service content and log in.
    pub async fn connect(
        endpoint: &VSphereEndpoint,
        insecure_tls: bool,
        verbose: bool,
    ) -> Result<Self, VSphereError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        let url = endpoint.url.clone();

        let response = invoke(
            &http,
            &url,
            &format!(
                r#"<RetrieveServiceContent xmlns="urn:vim25">{}</RetrieveServiceContent>"#,
                moref_element("_this", &ManagedObjectReference::new("ServiceInstance", "ServiceInstance"))
            ),
        )
        .await?;
        let content = response
            .child("returnval")
            .ok_or_else(|| VSphereError::Malformed("service content has no returnval".into()))?;

        let reference = |name: &str| {
            content
                .child(name)
                .and_then(XmlNode::to_moref)
                .ok_or_else(|| VSphereError::Malformed(format!("service content has no {}", name)))
        };
        let root_folder = reference("rootFolder")?;
        let property_collector = reference("propertyCollector")?;
        let session_manager = reference("sessionManager")?;

        let about = content
            .child("about")
            .map(|about| AboutInfo {
                full_name: about.child_text("fullName").unwrap_or_default().to_string(),
                version: about.child_text("version").unwrap_or_default().to_string(),
                api_type: about.child_text("apiType").unwrap_or_default().to_string(),
                instance_uuid: about.child_text("instanceUuid").unwrap_or_default().to_string(),
            })
            .unwrap_or_default();

        login(&http, endpoint, &session_manager).await?;

        if verbose {
            info!(
                url = %url,
                server = %about.full_name,
                version = %about.version,
                api_type = %about.api_type,
                instance_uuid = %about.instance_uuid,
                "Connected to vSphere"
            );
        } else {
            debug!(url = %url, version = %about.version, "Connected to vSphere");
        }

        Ok(Self {
            http,
            endpoint: endpoint.clone(),
            root_folder,
            property_collector,
            session_manager,
            about,
            session: AtomicU64::new(0),
            login: Mutex::new(()),
        })
    }

    pub fn about(&self) -> &AboutInfo {
        &self.about
    }

    /// Invoke a method, logging in again and retrying once if the session
    /// has expired.
    async fn invoke(&self, body: &str) -> Result<XmlNode, VSphereError> {
        let session = self.session.load(Ordering::Acquire);
        match invoke(&self.http, &self.endpoint.url, body).await {
            Err(VSphereError::Fault { code, .. }) if code == NOT_AUTHENTICATED => {
                self.renew_session(session).await?;
                invoke(&self.http, &self.endpoint.url, body).await
            }
            result => result,
        }
    }

    /// Log in again unless another caller already did since `seen`
    async fn renew_session(&self, seen: u64) -> Result<(), VSphereError> {
        let _guard = self.login.lock().await;
        if self.session.load(Ordering::Acquire) != seen {
            return Ok(());
        }
        warn!(
            url = %self.endpoint.url,
            user = %self.endpoint.user,
            "vSphere session expired, logging in again"
        );
        login(&self.http, &self.endpoint, &self.session_manager).await?;
        self.session.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

async fn login(
    http: &reqwest::Client,
    endpoint: &VSphereEndpoint,
    session_manager: &ManagedObjectReference,
) -> Result<(), VSphereError> {
    invoke(
        http,
        &endpoint.url,
        &format!(
            r#"<Login xmlns="urn:vim25">{}<userName>{}</userName><password>{}</password></Login>"#,
            moref_element("_this", session_manager),
            escape(&endpoint.user),
            escape(&endpoint.password)
        ),
    )
    .await?;
    Ok(())
}

/// POST one SOAP request and return the response element inside the body
async fn invoke(http: &reqwest::Client, url: &Url, body: &str) -> Result<XmlNode, VSphereError> {
    let envelope = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            r#"<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"#
        ),
        body
    );

    let response = http
        .post(url.clone())
        .header(CONTENT_TYPE, "text/xml; charset=utf-8")
        .header("SOAPAction", SOAP_ACTION)
        .body(envelope)
        .send()
        .await?;
    let status = response.status();
    let text = response.text().await?;

    let document = match xml::parse(&text) {
        Ok(document) => document,
        Err(_) if !status.is_success() => return Err(VSphereError::Status(status.as_u16())),
        Err(e) => return Err(e),
    };
    let body = document
        .into_child("Body")
        .ok_or_else(|| VSphereError::Malformed("response has no SOAP body".into()))?;
    if let Some(fault) = body.child("Fault") {
        return Err(fault_error(fault));
    }
    if !status.is_success() {
        return Err(VSphereError::Status(status.as_u16()));
    }
    body.children
        .into_iter()
        .next()
        .ok_or_else(|| VSphereError::Malformed("empty SOAP body".into()))
}

fn fault_error(fault: &XmlNode) -> VSphereError {
    let detail_kind = fault
        .child("detail")
        .and_then(|d| d.children.first())
        .map(|d| d.xsi_type().unwrap_or(&d.name).trim_end_matches("Fault").to_string());
    VSphereError::Fault {
        code: detail_kind
            .or_else(|| fault.child_text("faultcode").map(String::from))
            .unwrap_or_else(|| "Unknown".to_string()),
        message: fault.child_text("faultstring").unwrap_or_default().to_string(),
    }
}

fn moref_element(tag: &str, reference: &ManagedObjectReference) -> String {
    format!(
        r#"<{tag} type="{}">{}</{tag}>"#,
        escape(&reference.kind),
        escape(&reference.value),
        tag = tag
    )
}

/// Build a `RetrievePropertiesEx` request with one property spec per type
fn retrieve_request(
    collector: &ManagedObjectReference,
    refs: &[ManagedObjectReference],
    properties: &[&str],
) -> String {
    let mut kinds: Vec<&str> = Vec::new();
    for reference in refs {
        if !kinds.contains(&reference.kind.as_str()) {
            kinds.push(&reference.kind);
        }
    }

    let mut spec = String::new();
    for kind in kinds {
        spec.push_str(&format!("<propSet><type>{}</type>", escape(kind)));
        if properties.is_empty() {
            spec.push_str("<all>true</all>");
        } else {
            spec.push_str("<all>false</all>");
            for property in properties {
                spec.push_str(&format!("<pathSet>{}</pathSet>", escape(*property)));
            }
        }
        spec.push_str("</propSet>");
    }
    for reference in refs {
        spec.push_str(&format!(
            "<objectSet>{}<skip>false</skip></objectSet>",
            moref_element("obj", reference)
        ));
    }

    format!(
        r#"<RetrievePropertiesEx xmlns="urn:vim25">{}<specSet>{}</specSet><options></options></RetrievePropertiesEx>"#,
        moref_element("_this", collector),
        spec
    )
}

fn object_contents(returnval: &XmlNode) -> Result<Vec<PropertyBag>, VSphereError> {
    returnval
        .children_named("objects")
        .map(|objects| {
            let obj = objects
                .child("obj")
                .and_then(XmlNode::to_moref)
                .ok_or_else(|| VSphereError::Malformed("object content without obj".into()))?;
            let mut bag = PropertyBag::new(obj);
            for prop in objects.children_named("propSet") {
                if let Some(name) = prop.child_text("name") {
                    let value = prop
                        .child("val")
                        .map(XmlNode::to_value)
                        .unwrap_or(serde_json::Value::Null);
                    bag = bag.with(name, value);
                }
            }
            for missing in objects.children_named("missingSet") {
                debug!(
                    object = %bag.obj,
                    property = missing.child_text("path").unwrap_or_default(),
                    "Property not returned"
                );
            }
            Ok(bag)
        })
        .collect()
}

#[async_trait]
impl VSphereProvider for SoapClient {
    fn root_folder(&self) -> &ManagedObjectReference {
        &self.root_folder
    }

    async fn list_datacenters(&self, path: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        let pattern = if path.trim_matches('/').is_empty() { "*" } else { path };
        let mut datacenters = Vec::new();
        for object in finder::find(self, pattern).await? {
            match object.reference.kind.as_str() {
                "Datacenter" => datacenters.push(object),
                "Folder" => datacenters.extend(
                    finder::children(self, &object)
                        .await?
                        .into_iter()
                        .filter(|child| child.reference.kind == "Datacenter"),
                ),
                _ => {}
            }
        }
        Ok(datacenters)
    }

    async fn describe_folder(
        &self,
        folder: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError> {
        let bag = properties_of(self, folder, &["name"]).await?;
        let name = bag.str("name").ok_or_else(|| VSphereError::MissingProperty {
            object: folder.to_string(),
            property: "name".into(),
        })?;
        Ok(NamedReference {
            name,
            reference: folder.clone(),
        })
    }

    async fn datacenter_folders(
        &self,
        datacenter: &ManagedObjectReference,
    ) -> Result<DatacenterFolders, VSphereError> {
        let bag = properties_of(
            self,
            datacenter,
            &["name", "vmFolder", "hostFolder", "datastoreFolder", "networkFolder"],
        )
        .await?;
        let missing = |property: &str| VSphereError::MissingProperty {
            object: datacenter.to_string(),
            property: property.to_string(),
        };
        let name = bag.str("name").ok_or_else(|| missing("name"))?;
        let folder = |property: &str, leaf: &str| -> Result<FolderPath, VSphereError> {
            Ok(FolderPath {
                reference: bag.moref(property).ok_or_else(|| missing(property))?,
                inventory_path: format!("/{}/{}", name, leaf),
            })
        };
        Ok(DatacenterFolders {
            vm: folder("vmFolder", "vm")?,
            host: folder("hostFolder", "host")?,
            datastore: folder("datastoreFolder", "datastore")?,
            network: folder("networkFolder", "network")?,
        })
    }

    async fn list_hosts(&self, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        let mut hosts = Vec::new();
        for object in finder::find(self, pattern).await? {
            match object.reference.kind.as_str() {
                "HostSystem" => hosts.push(object),
                "ComputeResource" | "ClusterComputeResource" => {
                    hosts.extend(finder::children(self, &object).await?)
                }
                _ => {}
            }
        }
        Ok(hosts)
    }

    async fn list_datastores(&self, pattern: &str) -> Result<Vec<InventoryObject>, VSphereError> {
        let mut datastores = Vec::new();
        for object in finder::find(self, pattern).await? {
            match object.reference.kind.as_str() {
                "Datastore" => datastores.push(object),
                "StoragePod" => datastores.extend(
                    finder::children(self, &object)
                        .await?
                        .into_iter()
                        .filter(|child| child.reference.kind == "Datastore"),
                ),
                _ => {}
            }
        }
        Ok(datastores)
    }

    async fn retrieve_properties(
        &self,
        refs: &[ManagedObjectReference],
        properties: &[&str],
    ) -> Result<Vec<PropertyBag>, VSphereError> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = self
            .invoke(&retrieve_request(&self.property_collector, refs, properties))
            .await?;
        let mut bags = Vec::new();
        loop {
            let token = match response.child("returnval") {
                Some(returnval) => {
                    bags.extend(object_contents(returnval)?);
                    returnval.child_text("token").map(String::from)
                }
                None => None,
            };
            let Some(token) = token else { break };
            response = self
                .invoke(&format!(
                    r#"<ContinueRetrievePropertiesEx xmlns="urn:vim25">{}<token>{}</token></ContinueRetrievePropertiesEx>"#,
                    moref_element("_this", &self.property_collector),
                    escape(&token)
                ))
                .await?;
        }
        Ok(bags)
    }

    async fn management_ips(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<Vec<String>, VSphereError> {
        let bag = properties_of(self, host, &[MANAGEMENT_NETCONFIG]).await?;
        let mut ips = Vec::new();
        for net in bag.list(MANAGEMENT_NETCONFIG) {
            if net.get("nicType").and_then(value_str).as_deref() != Some("management") {
                continue;
            }
            let selected: Vec<String> = net
                .get("selectedVnic")
                .map(as_list)
                .unwrap_or_default()
                .into_iter()
                .filter_map(value_str)
                .collect();
            for vnic in net.get("candidateVnic").map(as_list).unwrap_or_default() {
                let Some(key) = vnic.get("key").and_then(value_str) else {
                    continue;
                };
                if !selected.contains(&key) {
                    continue;
                }
                if let Some(ip) = vnic
                    .get("spec")
                    .and_then(|spec| spec.get("ip"))
                    .and_then(|ip| ip.get("ipAddress"))
                    .and_then(value_str)
                {
                    ips.push(ip);
                }
            }
        }
        Ok(ips)
    }

    async fn resource_pool(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<NamedReference, VSphereError> {
        let missing = |object: &ManagedObjectReference, property: &str| VSphereError::MissingProperty {
            object: object.to_string(),
            property: property.to_string(),
        };
        let compute = properties_of(self, host, &["parent"])
            .await?
            .moref("parent")
            .ok_or_else(|| missing(host, "parent"))?;
        let pool = properties_of(self, &compute, &["resourcePool"])
            .await?
            .moref("resourcePool")
            .ok_or_else(|| missing(&compute, "resourcePool"))?;
        let name = properties_of(self, &pool, &["name"])
            .await?
            .str("name")
            .ok_or_else(|| missing(&pool, "name"))?;
        Ok(NamedReference {
            name,
            reference: pool,
        })
    }
}
