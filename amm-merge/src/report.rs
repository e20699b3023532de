//! Record of everything that happened during a merge.

use std::collections::HashSet;
use std::fmt;

use amm_xml::Name;
use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;

use crate::document::Document;
use crate::error::ErrorKind;
use crate::instructions::{AttributeOperation, NodeOperation};
use crate::node::{Node, NodeAttribute, NodeId, SourcePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
        })
    }
}

/// An error, warning or informational message.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(position) = &self.position {
            write!(f, "{position} ")?;
        }
        write!(f, "{}:\n\t{}", self.severity, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    /// The node or attribute was taken from the document at `position`.
    Added,
    /// The node or attribute at `position` was combined with the one already in the merged document.
    Merged,
    /// The node or attribute at `position` was left out of the merged document.
    Rejected,
    /// Added by the merger because of the document at `position`, see the action's reason.
    Implied,
    /// Set from a system property provided by the build.
    Injected,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "ADDED",
            Self::Merged => "MERGED",
            Self::Rejected => "REJECTED",
            Self::Implied => "IMPLIED",
            Self::Injected => "INJECTED",
        })
    }
}

/// The tools instruction responsible for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Instruction {
    Node(NodeOperation),
    Attribute(AttributeOperation),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(operation) => write!(f, "tools:node=\"{operation}\""),
            Self::Attribute(operation) => write!(f, "tools:{operation}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub node: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<Instruction>,
    pub position: SourcePosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.action_type, self.position)?;
        if let Some(instruction) = &self.instruction {
            write!(f, " ({instruction})")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " reason: {reason}")?;
        }
        Ok(())
    }
}

/// Messages and actions collected during one merge, in the order they happened.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    records: Vec<Record>,
    actions: Vec<Action>,
}

impl MergeReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>, position: Option<SourcePosition>) {
        let message = message.into();
        debug!("Error ({kind}): {message}");
        self.records.push(Record {
            severity: Severity::Error,
            kind: Some(kind),
            message,
            position,
        });
    }

    pub fn warning(&mut self, message: impl Into<String>, position: Option<SourcePosition>) {
        let message = message.into();
        debug!("Warning: {message}");
        self.records.push(Record {
            severity: Severity::Warning,
            kind: None,
            message,
            position,
        });
    }

    pub fn info(&mut self, message: impl Into<String>, position: Option<SourcePosition>) {
        self.records.push(Record {
            severity: Severity::Info,
            kind: None,
            message: message.into(),
            position,
        });
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn record_node(
        &mut self,
        node: &Node,
        action_type: ActionType,
        instruction: Option<Instruction>,
        reason: Option<String>,
    ) {
        debug!("{action_type} {} from {}", node.id(), node.origin);
        self.actions.push(Action {
            node: node.id(),
            attribute: None,
            action_type,
            instruction,
            position: node.origin.clone(),
            reason,
        });
    }

    /// Records the same action for a node, all of its descendants and all of their attributes.
    pub fn record_subtree(&mut self, node: &Node, action_type: ActionType) {
        self.record_node(node, action_type, None, None);
        for attr in node.attributes.iter().filter(|attr| !attr.name.is_tools()) {
            self.record_attribute(node, attr, action_type, None);
        }
        for child in &node.children {
            self.record_subtree(child, action_type);
        }
    }

    pub fn record_attribute(
        &mut self,
        node: &Node,
        attribute: &NodeAttribute,
        action_type: ActionType,
        instruction: Option<Instruction>,
    ) {
        self.actions.push(Action {
            node: node.id(),
            attribute: Some(attribute.name.to_string()),
            action_type,
            instruction,
            position: attribute.origin.clone(),
            reason: None,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|record| record.severity == Severity::Error)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn errors(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|record| record.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|record| record.severity == Severity::Warning)
    }

    /// Whether an error of the given kind was recorded.
    pub fn has_error_kind(&self, kind: &ErrorKind) -> bool {
        self.errors().any(|record| record.kind.as_ref() == Some(kind))
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Actions about the node itself, not its attributes.
    pub fn node_actions(&self, id: &NodeId) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|action| &action.node == id && action.attribute.is_none())
            .collect()
    }

    pub fn attribute_actions(&self, id: &NodeId, name: &Name) -> Vec<&Action> {
        let name = name.to_string();
        self.actions
            .iter()
            .filter(|action| &action.node == id && action.attribute.as_deref() == Some(name.as_str()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing merge report")
    }

    /// Lists, for every node of `document`, the actions that shaped it.
    pub fn blame(&self, document: &Document) -> String {
        let mut output = String::new();
        let mut written = HashSet::new();
        document.root().visit(&mut |node| {
            let id = node.id();
            if !written.insert(id.clone()) {
                return;
            }

            output.push_str(&format!("{id}\n"));
            for action in self.node_actions(&id) {
                output.push_str(&format!("{action}\n"));
            }

            let mut attribute_names: Vec<&str> = Vec::new();
            for action in self.actions.iter().filter(|action| action.node == id) {
                if let Some(name) = action.attribute.as_deref() {
                    if !attribute_names.contains(&name) {
                        attribute_names.push(name);
                    }
                }
            }
            for name in attribute_names {
                output.push_str(&format!("\t{name}\n"));
                for action in self
                    .actions
                    .iter()
                    .filter(|action| action.node == id && action.attribute.as_deref() == Some(name))
                {
                    output.push_str(&format!("\t\t{action}\n"));
                }
            }
        });

        output
    }
}
