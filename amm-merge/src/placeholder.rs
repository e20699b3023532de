//! Substitution of `${name}` placeholders in attribute values.

use std::collections::BTreeMap;

use log::debug;

use crate::document::Document;
use crate::error::ErrorKind;
use crate::model::Registry;
use crate::node::Node;
use crate::options::OutputKind;
use crate::report::MergeReport;

/// Replaces every `${name}` in the attribute values of `document` with `values[name]`.
///
/// Placeholders without a value are left in place. They are errors in application manifests,
/// library manifests may keep them for the consuming application to fill in.
pub fn substitute(
    document: &Document,
    values: &BTreeMap<String, String>,
    output: OutputKind,
    registry: &Registry,
    report: &mut MergeReport,
) -> Document {
    let mut root = document.root().clone();
    substitute_node(&mut root, values, output, report);
    // Keys may contain placeholders, e.g. `${applicationId}.provider`.
    document.with_root(root).reindex(registry)
}

fn substitute_node(node: &mut Node, values: &BTreeMap<String, String>, output: OutputKind, report: &mut MergeReport) {
    for attr in &mut node.attributes {
        if !attr.value.contains("${") {
            continue;
        }

        match replace_placeholders(&attr.value, values) {
            Ok(value) => {
                debug!("{} at {}: {} -> {}", attr.name, attr.origin, attr.value, value);
                attr.value = value;
            }
            Err(missing) => {
                let message = format!(
                    "Attribute {} at {} requires a placeholder substitution but no value for <{}> is provided.",
                    attr.name, attr.origin, missing
                );
                match output {
                    OutputKind::Application => {
                        report.error(ErrorKind::UnresolvedPlaceholder, message, Some(attr.origin.clone()))
                    }
                    OutputKind::Library => report.info(message, Some(attr.origin.clone())),
                }
            }
        }
    }

    for child in &mut node.children {
        substitute_node(child, values, output, report);
    }
}

/// Replaces the placeholders in `value`, returning the name of the first one without a value on failure.
pub fn replace_placeholders(value: &str, values: &BTreeMap<String, String>) -> Result<String, String> {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(length) = rest[start + 2..].find('}') else {
            // Unterminated, kept as written.
            break;
        };

        let name = &rest[start + 2..start + 2 + length];
        let replacement = values.get(name).ok_or_else(|| name.to_string())?;
        result.push_str(&rest[..start]);
        result.push_str(replacement);
        rest = &rest[start + 3 + length..];
    }
    result.push_str(rest);

    Ok(result)
}
