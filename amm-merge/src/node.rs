use std::fmt;

use amm_xml::{Attribute, Element, Name, Position};
use serde::Serialize;

use crate::instructions::NodeInstructions;

/// Where a node or attribute was declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourcePosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(file: &str, position: Position) -> Self {
        Self {
            file: file.to_string(),
            line: position.line,
            column: position.column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Identity of a node: its element type and its key, if the type has one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId {
    pub element_type: String,
    pub key: Option<String>,
}

impl NodeId {
    pub fn new(element_type: &str, key: Option<&str>) -> Self {
        Self {
            element_type: element_type.to_string(),
            key: key.map(str::to_string),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}#{}", self.element_type, key),
            None => f.write_str(&self.element_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttribute {
    pub name: Name,
    pub value: String,
    pub origin: SourcePosition,
}

/// An element of a manifest, annotated with everything the merger needs to know about it.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: Name,
    /// `None` for elements not in the registry which are passed through untouched.
    pub element_type: Option<String>,
    pub key: Option<String>,
    pub attributes: Vec<NodeAttribute>,
    pub children: Vec<Node>,
    pub instructions: NodeInstructions,
    pub origin: SourcePosition,
}

impl Node {
    pub fn new(name: Name, element_type: Option<String>, origin: SourcePosition) -> Self {
        Self {
            name,
            element_type,
            key: None,
            attributes: Vec::new(),
            children: Vec::new(),
            instructions: NodeInstructions::default(),
            origin,
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId {
            element_type: self
                .element_type
                .clone()
                .unwrap_or_else(|| self.name.local_name.clone()),
            key: self.key.clone(),
        }
    }

    pub fn is_typed(&self) -> bool {
        self.element_type.is_some()
    }

    pub fn attribute(&self, name: &Name) -> Option<&NodeAttribute> {
        self.attributes.iter().find(|attr| &attr.name == name)
    }

    pub fn attribute_value(&self, name: &Name) -> Option<&str> {
        self.attribute(name).map(|attr| attr.value.as_str())
    }

    pub fn set_attribute(&mut self, name: Name, value: impl Into<String>, origin: SourcePosition) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.origin = origin;
            }
            None => self.attributes.push(NodeAttribute { name, value, origin }),
        }
    }

    pub fn children_of_type<'a>(&'a self, element_type: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children
            .iter()
            .filter(move |child| child.element_type.as_deref() == Some(element_type))
    }

    /// Calls `visit` on this node and all of its descendants, parents first.
    pub fn visit<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.visit(visit);
        }
    }

    /// A copy of this node without its children.
    pub(crate) fn shallow_clone(&self) -> Node {
        Node {
            name: self.name.clone(),
            element_type: self.element_type.clone(),
            key: self.key.clone(),
            attributes: self.attributes.clone(),
            children: Vec::new(),
            instructions: self.instructions.clone(),
            origin: self.origin.clone(),
        }
    }

    /// Compares two subtrees, ignoring tools attributes, source positions and child order.
    /// Returns a description of the first difference found.
    pub fn compare(&self, other: &Node) -> Option<String> {
        if self.name != other.name {
            return Some(format!("element <{}> differs from <{}>", self.name, other.name));
        }

        let own_attributes = self.attributes.iter().filter(|attr| !attr.name.is_tools());
        let other_attributes = other.attributes.iter().filter(|attr| !attr.name.is_tools());
        if own_attributes.clone().count() != other_attributes.count() {
            return Some(format!("<{}> attributes differ in number", self.name));
        }
        for attr in own_attributes {
            match other.attribute_value(&attr.name) {
                Some(value) if value == attr.value => {}
                Some(value) => {
                    return Some(format!(
                        "attribute {}@{} has value ({}) at {} but ({}) at {}",
                        self.id(),
                        attr.name,
                        attr.value,
                        attr.origin,
                        value,
                        other.origin
                    ))
                }
                None => {
                    return Some(format!(
                        "attribute {}@{} is missing from {}",
                        self.id(),
                        attr.name,
                        other.origin
                    ))
                }
            }
        }

        if self.children.len() != other.children.len() {
            return Some(format!("{} has a different number of children at {}", self.id(), other.origin));
        }
        for child in &self.children {
            let id = child.id();
            let counterpart = other
                .children
                .iter()
                .filter(|candidate| candidate.name == child.name && candidate.id() == id)
                .find(|candidate| child.compare(candidate).is_none());
            if counterpart.is_none() {
                return Some(format!("child {} at {} has no equal counterpart at {}", id, child.origin, other.origin));
            }
        }

        None
    }

    pub(crate) fn to_element(&self) -> Element {
        let position = Position {
            line: self.origin.line,
            column: self.origin.column,
        };
        Element {
            name: self.name.clone(),
            namespaces: Vec::new(),
            attributes: self
                .attributes
                .iter()
                .map(|attr| Attribute {
                    name: attr.name.clone(),
                    value: attr.value.clone(),
                    position,
                })
                .collect(),
            children: self.children.iter().map(Node::to_element).collect(),
            position,
        }
    }
}
