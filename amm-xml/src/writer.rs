use std::collections::HashMap;
use std::io::Write;

use anyhow::{Context, Result};
use xml::writer::{EventWriter, XmlEvent};

use super::{Element, Name, Namespace};

type XmlName<'a> = xml::name::Name<'a>;

/// Writes the element tree as an indented XML document.
pub fn write_document<W: Write>(root: &Element, out: W) -> Result<()> {
    let mut writer = xml::EmitterConfig::new()
        .perform_indent(true)
        .indent_string("    ")
        .create_writer(out);

    // The currently available namespace prefixes. (Key is URI, value is namespace prefix)
    // Needed to correctly write the namespace prefix with each element and attribute.
    let mut current_ns_prefixes: HashMap<String, String> = HashMap::new();
    write_element(&mut writer, root, &mut current_ns_prefixes)
}

/// Writes the element tree into a string.
pub fn to_string(root: &Element) -> Result<String> {
    let mut buffer = Vec::new();
    write_document(root, &mut buffer)?;
    String::from_utf8(buffer).context("Writer produced invalid UTF-8")
}

fn write_element<W: Write>(
    writer: &mut EventWriter<W>,
    element: &Element,
    current_ns_prefixes: &mut HashMap<String, String>,
) -> Result<()> {
    // Elements merged in from another document may use a namespace which is not declared in this one.
    // In that case the namespace is declared on the element itself, reusing the prefix from the original document.
    let mut declarations: Vec<Namespace> = element.namespaces.clone();
    let used_names = std::iter::once(&element.name).chain(element.attributes.iter().map(|attr| &attr.name));
    for name in used_names {
        if let Some(uri) = &name.namespace {
            let declared_here = declarations.iter().any(|ns| &ns.uri == uri);
            if !declared_here && !current_ns_prefixes.contains_key(uri) {
                declarations.push(Namespace {
                    prefix: Some(name.prefix.clone().unwrap_or_else(|| format!("ns{}", declarations.len()))),
                    uri: uri.clone(),
                });
            }
        }
    }

    let mut shadowed: Vec<(String, Option<String>)> = Vec::with_capacity(declarations.len());
    for ns in &declarations {
        let previous = current_ns_prefixes.insert(ns.uri.clone(), ns.prefix.clone().unwrap_or_default());
        shadowed.push((ns.uri.clone(), previous));
    }

    {
        let mut builder = XmlEvent::start_element(get_xml_name(&element.name, current_ns_prefixes));
        for attr in &element.attributes {
            builder = builder.attr(get_xml_name(&attr.name, current_ns_prefixes), &attr.value);
        }
        for ns in &declarations {
            if let Some(prefix) = &ns.prefix {
                builder = builder.ns(prefix.as_str(), ns.uri.as_str());
            } else {
                builder = builder.default_ns(ns.uri.as_str());
            }
        }
        writer.write(builder).context("Writing start element")?;
    }

    for child in &element.children {
        write_element(writer, child, current_ns_prefixes)?;
    }

    writer
        .write(XmlEvent::end_element().name(get_xml_name(&element.name, current_ns_prefixes)))
        .context("Writing end element")?;

    for (uri, previous) in shadowed.into_iter().rev() {
        match previous {
            Some(prefix) => current_ns_prefixes.insert(uri, prefix),
            None => current_ns_prefixes.remove(&uri),
        };
    }

    Ok(())
}

// Converts a name into an XmlName, using the prefix currently bound to its namespace.
fn get_xml_name<'a>(name: &'a Name, ns_prefixes: &'a HashMap<String, String>) -> XmlName<'a> {
    match &name.namespace {
        Some(ns_uri) => XmlName::qualified(
            &name.local_name,
            ns_uri,
            ns_prefixes
                .get(ns_uri)
                .map(|prefix| prefix.as_str())
                .filter(|prefix| !prefix.is_empty()),
        ),
        None => XmlName::local(&name.local_name),
    }
}
