//! Removal of tools instructions from a merged manifest.

use amm_xml::TOOLS_NS_URI;
use log::debug;

use crate::document::Document;
use crate::error::ErrorKind;
use crate::instructions::NodeInstructions;
use crate::node::Node;
use crate::options::OutputKind;
use crate::report::MergeReport;

/// Prepares a merged document for output.
///
/// Application manifests lose every tools attribute, the tools namespace declaration and the nodes
/// that only existed to remove others. Library manifests are returned as is, since the instructions
/// still apply when the library is merged into an application.
/// Returns `None` if the root element itself is marked for removal.
pub fn clean_tools_references(document: &Document, output: OutputKind, report: &mut MergeReport) -> Option<Document> {
    let root = document.root();
    if root.instructions.operation.is_removal() {
        report.error(
            ErrorKind::IllegalToolsInstruction,
            format!(
                "tools:node=\"{}\" is not allowed on the root element",
                root.instructions.operation
            ),
            Some(root.origin.clone()),
        );
        return None;
    }

    if output == OutputKind::Library {
        return Some(document.clone());
    }

    let mut cleaned = root.clone();
    clean_node(&mut cleaned);
    let namespaces = document
        .namespaces()
        .iter()
        .filter(|ns| ns.uri != TOOLS_NS_URI)
        .cloned()
        .collect();
    Some(document.with_root(cleaned).with_namespaces(namespaces))
}

fn clean_node(node: &mut Node) {
    node.attributes.retain(|attr| !attr.name.is_tools());
    node.instructions = NodeInstructions::default();
    node.children.retain(|child| {
        let removal = child.instructions.operation.is_removal();
        if removal {
            debug!("Dropping removal instruction {} at {}", child.id(), child.origin);
        }
        !removal
    });
    for child in &mut node.children {
        clean_node(child);
    }
}
