// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The protocol catalog: immutable interface descriptors loaded once at startup from
//! protocol-description files, and consumed read-only by every instance's decoder.
//!
//! This module owns both halves of that contract: the descriptor shapes the decoder walks, and
//! the `roxmltree`-based loader that builds them from this repository's description schema. The
//! schema is intentionally simple — a `<protocol>` of `<interface>`s, each with ordered
//! `<request>`/`<event>` children and ordered `<arg>` children — because the exact grammar of
//! protocol-description files is ambient glue, not the hard-engineering core this repository is
//! about.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::CatalogError;

/// One method or event: a name, its wire signature, and, for each `o`/`n` slot in that signature,
/// the interface it is statically typed to (if any).
#[derive(Debug, Clone)]
pub struct MessageSignature {
    pub name: String,
    /// A string over the alphabet `{u, i, f, s, o, n, a, h, N}`.
    pub signature: String,
    /// One entry per `o` or `n` character in `signature`, in order, giving the interface that
    /// slot is statically typed to (`None` for an untyped `o`, or for the dynamically-typed `N`
    /// form, which is resolved against the catalog at decode time instead).
    pub arg_interfaces: Vec<Option<Arc<InterfaceDescriptor>>>,
}

/// A named collection of methods (client→server) and events (server→client), each with an
/// ordered signature.
#[derive(Debug)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub methods: Vec<MessageSignature>,
    pub events: Vec<MessageSignature>,
}

impl InterfaceDescriptor {
    pub fn method(&self, opcode: u16) -> Option<&MessageSignature> {
        self.methods.get(opcode as usize)
    }

    pub fn event(&self, opcode: u16) -> Option<&MessageSignature> {
        self.events.get(opcode as usize)
    }
}

/// The immutable, process-wide set of interface descriptors.
#[derive(Debug, Default)]
pub struct ProtocolCatalog {
    pub(crate) interfaces: HashMap<String, Arc<InterfaceDescriptor>>,
    pub(crate) display_name: Option<String>,
}

impl ProtocolCatalog {
    pub fn lookup(&self, name: &str) -> Option<Arc<InterfaceDescriptor>> {
        self.interfaces.get(name).cloned()
    }

    pub fn display(&self) -> Option<Arc<InterfaceDescriptor>> {
        self.display_name.as_deref().and_then(|name| self.lookup(name))
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

/// The name this loader treats as the designated display interface, if present.
const DISPLAY_INTERFACE_NAME: &str = "wl_display";

/// Builds a `ProtocolCatalog` from a set of description files.
///
/// Interfaces are collected from all files first (so that an `interface="..."` attribute in one
/// file can refer to an interface declared in another), then every `arg`'s interface reference is
/// resolved; an unresolvable reference is a catalog load failure.
pub fn load(paths: &[impl AsRef<Path>]) -> Result<ProtocolCatalog, CatalogError> {
    let mut raw_interfaces = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| CatalogError::Read(path.display().to_string(), e))?;
        let document = roxmltree::Document::parse(&text)
            .map_err(|e| CatalogError::Xml(path.display().to_string(), e.to_string()))?;
        raw_interfaces.extend(parse_document(&document)?);
    }

    let mut interfaces: HashMap<String, Arc<InterfaceDescriptor>> = HashMap::new();
    let mut pending: HashMap<String, RawInterface> = HashMap::new();
    for raw in raw_interfaces {
        if pending.contains_key(&raw.name) || interfaces.contains_key(&raw.name) {
            return Err(CatalogError::DuplicateInterface(raw.name));
        }
        pending.insert(raw.name.clone(), raw);
    }

    // Two-pass resolution: first create every descriptor with empty tables so that interface
    // references between descriptors can be satisfied regardless of declaration order, then fill
    // in each descriptor's methods/events now that every name resolves.
    let names: Vec<String> = pending.keys().cloned().collect();
    for name in &names {
        interfaces.insert(
            name.clone(),
            Arc::new(InterfaceDescriptor { name: name.clone(), methods: vec![], events: vec![] }),
        );
    }

    let mut resolved: HashMap<String, Arc<InterfaceDescriptor>> = HashMap::new();
    for name in &names {
        let raw = pending.get(name).expect("name came from pending's own keys");
        let methods = resolve_messages(&raw.methods, &interfaces)?;
        let events = resolve_messages(&raw.events, &interfaces)?;
        resolved.insert(
            name.clone(),
            Arc::new(InterfaceDescriptor { name: name.clone(), methods, events }),
        );
    }

    let display_name =
        resolved.contains_key(DISPLAY_INTERFACE_NAME).then(|| DISPLAY_INTERFACE_NAME.to_string());

    Ok(ProtocolCatalog { interfaces: resolved, display_name })
}

fn resolve_messages(
    raw: &[RawMessage],
    interfaces: &HashMap<String, Arc<InterfaceDescriptor>>,
) -> Result<Vec<MessageSignature>, CatalogError> {
    raw.iter()
        .map(|m| {
            let mut arg_interfaces = Vec::new();
            for slot in &m.arg_interfaces {
                match slot {
                    None => arg_interfaces.push(None),
                    Some(name) => {
                        let iface = interfaces
                            .get(name)
                            .cloned()
                            .ok_or_else(|| CatalogError::UnknownInterfaceRef(name.clone()))?;
                        arg_interfaces.push(Some(iface));
                    }
                }
            }
            Ok(MessageSignature {
                name: m.name.clone(),
                signature: m.signature.clone(),
                arg_interfaces,
            })
        })
        .collect()
}

struct RawInterface {
    name: String,
    methods: Vec<RawMessage>,
    events: Vec<RawMessage>,
}

struct RawMessage {
    name: String,
    signature: String,
    /// One entry per `o`/`n` character in `signature`, giving the referenced interface name.
    arg_interfaces: Vec<Option<String>>,
}

fn parse_document(document: &roxmltree::Document) -> Result<Vec<RawInterface>, CatalogError> {
    let root = document.root_element();
    let mut interfaces = Vec::new();
    for node in root.children().filter(|n| n.has_tag_name("interface")) {
        let name = node
            .attribute("name")
            .ok_or_else(|| CatalogError::Xml("<memory>".to_string(), "interface missing name".into()))?
            .to_string();

        let methods = node
            .children()
            .filter(|n| n.has_tag_name("request"))
            .map(parse_message)
            .collect::<Result<Vec<_>, _>>()?;
        let events = node
            .children()
            .filter(|n| n.has_tag_name("event"))
            .map(parse_message)
            .collect::<Result<Vec<_>, _>>()?;

        interfaces.push(RawInterface { name, methods, events });
    }
    Ok(interfaces)
}

fn parse_message(node: roxmltree::Node) -> Result<RawMessage, CatalogError> {
    let name = node
        .attribute("name")
        .ok_or_else(|| CatalogError::Xml("<memory>".to_string(), "request/event missing name".into()))?
        .to_string();

    let mut signature = String::new();
    let mut arg_interfaces = Vec::new();
    for arg in node.children().filter(|n| n.has_tag_name("arg")) {
        let ty = arg.attribute("type").unwrap_or("u");
        let iface = arg.attribute("interface").map(str::to_string);
        match ty {
            "u" | "uint" => signature.push('u'),
            "i" | "int" => signature.push('i'),
            "f" | "fixed" => signature.push('f'),
            "s" | "string" => signature.push('s'),
            "a" | "array" => signature.push('a'),
            "h" | "fd" => signature.push('h'),
            "o" | "object" => {
                signature.push('o');
                arg_interfaces.push(iface);
                continue;
            }
            "n" | "new_id" => {
                signature.push('n');
                arg_interfaces.push(iface);
                continue;
            }
            "new_id_dynamic" => {
                signature.push('N');
                arg_interfaces.push(None);
                continue;
            }
            other => {
                return Err(CatalogError::Xml(
                    "<memory>".to_string(),
                    format!("unknown arg type \"{other}\""),
                ))
            }
        }
    }

    Ok(RawMessage { name, signature, arg_interfaces })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile_path::TempPath {
        tempfile_path::TempPath::new(contents)
    }

    /// A tiny self-contained temp-file helper, since this repository does not otherwise depend on
    /// a temp-file crate for anything but this test module.
    mod tempfile_path {
        use std::io::Write;
        use std::path::{Path, PathBuf};
        use std::sync::atomic::{AtomicU32, Ordering};

        static COUNTER: AtomicU32 = AtomicU32::new(0);

        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn new(contents: &str) -> Self {
                let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
                let mut path = std::env::temp_dir();
                path.push(format!("wl_tracer_catalog_test_{}_{unique}.xml", std::process::id()));
                let mut file = std::fs::File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                Self(path)
            }
        }

        impl AsRef<Path> for TempPath {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    const DISPLAY_AND_REGISTRY: &str = r#"
        <protocol name="core">
          <interface name="wl_display">
            <request name="get_registry">
              <arg name="registry" type="new_id" interface="wl_registry"/>
            </request>
          </interface>
          <interface name="wl_registry">
            <request name="bind">
              <arg name="name" type="uint"/>
              <arg name="id" type="new_id_dynamic"/>
            </request>
            <event name="global">
              <arg name="name" type="uint"/>
              <arg name="interface" type="string"/>
              <arg name="version" type="uint"/>
            </event>
          </interface>
        </protocol>
    "#;

    #[test]
    fn loads_interfaces_and_designates_display() {
        let path = write_temp(DISPLAY_AND_REGISTRY);
        let catalog = load(&[path]).unwrap();
        assert!(!catalog.is_empty());
        let display = catalog.display().expect("wl_display should be designated");
        assert_eq!(display.name, "wl_display");

        let get_registry = display.method(0).unwrap();
        assert_eq!(get_registry.signature, "n");
        assert_eq!(get_registry.arg_interfaces[0].as_ref().unwrap().name, "wl_registry");

        let registry = catalog.lookup("wl_registry").unwrap();
        let bind = registry.method(0).unwrap();
        assert_eq!(bind.signature, "uN");

        let global = registry.event(0).unwrap();
        assert_eq!(global.signature, "usu");
    }

    #[test]
    fn unknown_interface_reference_is_an_error() {
        let path = write_temp(
            r#"<protocol name="core">
                 <interface name="wl_display">
                   <request name="get_registry">
                     <arg name="registry" type="new_id" interface="does_not_exist"/>
                   </request>
                 </interface>
               </protocol>"#,
        );
        assert!(matches!(load(&[path]), Err(CatalogError::UnknownInterfaceRef(_))));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let path = write_temp("<protocol><interface name=\"oops\">");
        assert!(matches!(load(&[path]), Err(CatalogError::Xml(_, _))));
    }
}
