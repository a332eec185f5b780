//! Minimal XML tree for vim25 SOAP responses
//!
//! Responses are read into an `XmlNode` tree with namespace prefixes
//! stripped from element names. Property values are converted to JSON:
//! references become `{"type", "value"}` objects, `ArrayOf*` values become
//! arrays, repeated child elements become arrays and leaves become strings.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::vsphere::{ManagedObjectReference, VSphereError};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct XmlNode {
    pub name: String,
    /// Attributes keyed by their qualified name (`type`, `xsi:type`)
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn into_child(self, name: &str) -> Option<XmlNode> {
        self.children.into_iter().find(|c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The schema type from an `xsi:type`-style attribute
    pub fn xsi_type(&self) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.ends_with(":type"))
            .map(|(_, v)| v.as_str())
    }

    pub fn to_moref(&self) -> Option<ManagedObjectReference> {
        let kind = self.attr("type")?;
        Some(ManagedObjectReference::new(kind, self.text.trim()))
    }

    pub fn to_value(&self) -> Value {
        let xsi_type = self.xsi_type();
        if xsi_type.map_or(false, |t| t.starts_with("ArrayOf")) {
            return Value::Array(self.children.iter().map(XmlNode::to_value).collect());
        }

        if self.children.is_empty() {
            return match self.to_moref() {
                Some(reference) => reference.to_value(),
                None => Value::String(self.text.clone()),
            };
        }

        let mut map = Map::new();
        if let Some(t) = xsi_type {
            map.insert("_type".to_string(), Value::String(t.to_string()));
        }
        for child in &self.children {
            let value = child.to_value();
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

fn malformed(e: impl std::fmt::Display) -> VSphereError {
    VSphereError::Malformed(e.to_string())
}

fn start_node(start: &BytesStart) -> Result<XmlNode, VSphereError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        attrs.push((key, value));
    }
    Ok(XmlNode {
        name,
        attrs,
        ..Default::default()
    })
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// Parse a document into its root element
pub(crate) fn parse(xml: &str) -> Result<XmlNode, VSphereError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(start_node(&start)?),
            Event::Empty(start) => {
                let node = start_node(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced end tag"))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("empty document"))
}
