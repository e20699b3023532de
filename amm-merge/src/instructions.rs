//! Instructions given to the merger through attributes in the `tools` namespace.

use std::fmt;
use std::str::FromStr;

use amm_xml::{Name, Namespace};
use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::document::Document;
use crate::node::NodeAttribute;

/// Value of `tools:node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeOperation {
    #[default]
    Merge,
    MergeOnlyAttributes,
    Replace,
    Remove,
    RemoveAll,
    Strict,
}

impl NodeOperation {
    /// Whether the node only exists to remove nodes from lower priority documents.
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Remove | Self::RemoveAll)
    }
}

impl FromStr for NodeOperation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            "merge" => Self::Merge,
            "merge-only-attributes" | "mergeOnlyAttributes" => Self::MergeOnlyAttributes,
            "replace" => Self::Replace,
            "remove" => Self::Remove,
            "removeAll" => Self::RemoveAll,
            "strict" => Self::Strict,
            other => return Err(anyhow!("`{other}` is not a valid tools:node value")),
        })
    }
}

impl fmt::Display for NodeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Merge => "merge",
            Self::MergeOnlyAttributes => "merge-only-attributes",
            Self::Replace => "replace",
            Self::Remove => "remove",
            Self::RemoveAll => "removeAll",
            Self::Strict => "strict",
        })
    }
}

/// An instruction about individual attributes: `tools:remove`, `tools:replace` or `tools:strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeOperation {
    Remove,
    Replace,
    Strict,
}

impl AttributeOperation {
    fn tools_name(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Strict => "strict",
        }
    }
}

impl fmt::Display for AttributeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tools_name())
    }
}

/// Restricts an instruction to lower priority documents with a given package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    package: String,
}

impl Selector {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn applies_to(&self, document: &Document) -> bool {
        document.package() == Some(self.package.as_str())
    }
}

/// All tools instructions declared on one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInstructions {
    pub operation: NodeOperation,
    pub selector: Option<Selector>,
    pub attribute_operations: Vec<(Name, AttributeOperation)>,
    /// From `tools:overrideLibrary` on `uses-sdk`.
    pub override_libraries: Vec<Selector>,
}

impl NodeInstructions {
    /// Reads the instructions from the attributes of a node.
    /// `namespaces` are the declarations in scope, used to resolve prefixed names in attribute lists.
    pub fn parse(attributes: &[NodeAttribute], namespaces: &[Namespace]) -> Result<Self> {
        let mut instructions = Self::default();
        for attr in attributes.iter().filter(|attr| attr.name.is_tools()) {
            match attr.name.local_name.as_str() {
                "node" => instructions.operation = attr.value.parse()?,
                "selector" => instructions.selector = Some(Selector::new(attr.value.trim())),
                "overrideLibrary" => {
                    instructions.override_libraries = split_list(&attr.value).map(Selector::new).collect()
                }
                "remove" | "replace" | "strict" => {
                    let operation = match attr.name.local_name.as_str() {
                        "remove" => AttributeOperation::Remove,
                        "replace" => AttributeOperation::Replace,
                        _ => AttributeOperation::Strict,
                    };
                    for name in split_list(&attr.value) {
                        instructions
                            .attribute_operations
                            .push((parse_attribute_name(name, namespaces), operation));
                    }
                }
                // Other tools attributes (tools:ignore, tools:targetApi...) are for other tools.
                _ => {}
            }
        }

        Ok(instructions)
    }

    /// The node operation to apply when merging with `lower`, taking the selector into account.
    pub fn operation_for(&self, lower: &Document) -> NodeOperation {
        match &self.selector {
            Some(selector) if !selector.applies_to(lower) => NodeOperation::Merge,
            _ => self.operation,
        }
    }

    pub fn attribute_operation(&self, name: &Name) -> Option<AttributeOperation> {
        self.attribute_operations
            .iter()
            .find(|(target, _)| targets(target, name))
            .map(|(_, operation)| *operation)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

// Attribute lists are usually written as `android:theme`, but the prefix is often left out.
fn parse_attribute_name(name: &str, namespaces: &[Namespace]) -> Name {
    if name.contains(':') {
        Name::from_qualified_in(name, namespaces)
    } else {
        Name::local(name)
    }
}

fn targets(target: &Name, name: &Name) -> bool {
    if target.namespace.is_none() {
        target.local_name == name.local_name
    } else {
        target == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SourcePosition;

    fn tools_attr(name: &str, value: &str) -> NodeAttribute {
        NodeAttribute {
            name: Name::tools(name),
            value: value.to_string(),
            origin: SourcePosition::default(),
        }
    }

    #[test]
    fn parses_node_and_attribute_instructions() {
        let instructions = NodeInstructions::parse(
            &[
                tools_attr("node", "replace"),
                tools_attr("remove", "theme, android:exported"),
                tools_attr("replace", "android:label"),
                tools_attr("ignore", "MissingClass"),
            ],
            &[],
        )
        .unwrap();

        assert_eq!(instructions.operation, NodeOperation::Replace);
        assert_eq!(
            instructions.attribute_operation(&Name::android("theme")),
            Some(AttributeOperation::Remove)
        );
        assert_eq!(
            instructions.attribute_operation(&Name::android("exported")),
            Some(AttributeOperation::Remove)
        );
        assert_eq!(
            instructions.attribute_operation(&Name::android("label")),
            Some(AttributeOperation::Replace)
        );
        assert_eq!(instructions.attribute_operation(&Name::android("icon")), None);
    }

    #[test]
    fn attribute_lists_resolve_declared_prefixes() {
        let dist = "http://schemas.android.com/apk/distribution";
        let namespaces = [Namespace {
            prefix: Some("dist".to_string()),
            uri: dist.to_string(),
        }];
        let instructions = NodeInstructions::parse(&[tools_attr("remove", "dist:module")], &namespaces).unwrap();

        assert_eq!(instructions.attribute_operation(&Name::android("module")), None);
        let module = Name {
            local_name: "module".to_string(),
            namespace: Some(dist.to_string()),
            prefix: None,
        };
        assert_eq!(instructions.attribute_operation(&module), Some(AttributeOperation::Remove));
    }

    #[test]
    fn rejects_unknown_node_operations() {
        assert!(NodeInstructions::parse(&[tools_attr("node", "delete")], &[]).is_err());
    }

    #[test]
    fn override_library_lists() {
        let instructions =
            NodeInstructions::parse(&[tools_attr("overrideLibrary", "com.lib.one, com.lib.two")], &[]).unwrap();
        let packages: Vec<&str> = instructions.override_libraries.iter().map(|s| s.package()).collect();
        assert_eq!(packages, vec!["com.lib.one", "com.lib.two"]);
    }
}
