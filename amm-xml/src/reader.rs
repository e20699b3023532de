use std::collections::HashMap;
use std::io::Read;

use anyhow::{anyhow, Context, Result};
use xml::common::Position as _;
use xml::reader::XmlEvent;

use super::{Attribute, Element, Namespace, Position};

/// Parses an XML document into its root element.
pub fn parse_document<R: Read>(source: R) -> Result<Element> {
    let mut reader = xml::ParserConfig::new()
        .trim_whitespace(true)
        .ignore_comments(true)
        .create_reader(source);

    // Elements that have been opened but not yet closed. The last one is the element currently being read.
    let mut open_elements: Vec<Element> = Vec::new();
    // The namespaces declared by each open element, alongside the URI that each prefix
    // was bound to before the declaration (if any) so the outer binding can be restored.
    let mut declared_nses: Vec<Vec<(Namespace, Option<String>)>> = Vec::new();
    // Map of current namespace prefixes to namespace URIs.
    let mut current_namespace_map: HashMap<String, String> = HashMap::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.next().context("Reading manifest XML")?;
        let text_pos = reader.position();
        let position = Position {
            line: text_pos.row as u32 + 1,
            column: text_pos.column as u32 + 1,
        };

        match event {
            XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                if root.is_some() {
                    return Err(anyhow!("Found a second root element at {position}"));
                }

                // We are only provided with the current map of namespaces, NOT which ones are declared with this element.
                // So, detect which namespaces have been added with this element.
                let newly_declared: Vec<Namespace> = namespace
                    .0
                    .iter()
                    .filter(|(prefix, uri)|
                        // These namespaces are automatically added by the xml crate and are implied anyway
                        **prefix != "xml" && **prefix != "xmlns" && !uri.is_empty() &&
                        current_namespace_map.get(*prefix) != Some(uri))
                    .map(|(prefix, uri)| Namespace {
                        // The XML crate uses a blank string for "no prefix"
                        prefix: if prefix == xml::namespace::NS_NO_PREFIX {
                            None
                        } else {
                            Some(prefix.clone())
                        },
                        uri: uri.clone(),
                    })
                    .collect();

                let mut declared = Vec::with_capacity(newly_declared.len());
                for ns in &newly_declared {
                    let prefix = ns.prefix.clone().unwrap_or_default();
                    let previous = current_namespace_map.insert(prefix, ns.uri.clone());
                    declared.push((ns.clone(), previous));
                }
                declared_nses.push(declared);

                let attributes = attributes
                    .into_iter()
                    .map(|attr| Attribute {
                        name: attr.name.into(),
                        value: attr.value,
                        position,
                    })
                    .collect();

                open_elements.push(Element {
                    name: name.into(),
                    namespaces: newly_declared,
                    attributes,
                    children: Vec::new(),
                    position,
                });
            }
            XmlEvent::EndElement { name } => {
                let element = open_elements
                    .pop()
                    .ok_or_else(|| anyhow!("Closing tag `{}` had no matching opening tag", name.local_name))?;

                // End the declared namespaces in reverse order, restoring any binding they shadowed.
                let nses = declared_nses.pop().unwrap_or_default();
                for (ns, previous) in nses.into_iter().rev() {
                    let prefix = ns.prefix.unwrap_or_default();
                    match previous {
                        Some(uri) => current_namespace_map.insert(prefix, uri),
                        None => current_namespace_map.remove(&prefix),
                    };
                }

                match open_elements.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            XmlEvent::EndDocument => break,
            _ => {} // No need for any other events
        }
    }

    root.ok_or(anyhow!("Document did not contain a root element"))
}

/// Convenience wrapper around [`parse_document`] for in-memory documents.
pub fn parse_str(source: &str) -> Result<Element> {
    parse_document(source.as_bytes())
}
