//! Module to parse and save manifest XML as an owned element tree.
//! Used as the input and output format of the manifest merger.
//!
//! Only elements, attributes and namespace declarations are kept. Comments, processing instructions
//! and character data are dropped when reading, since manifest elements carry all of their data in attributes.
//!
//! Every element and attribute remembers the line and column it was read from so that a merged
//! document can be traced back to the file that contributed each piece of it.

mod reader;
mod writer;

use std::fmt;
use std::hash::{Hash, Hasher};

pub use reader::{parse_document, parse_str};
pub use writer::{to_string, write_document};

pub const ANDROID_NS_URI: &str = "http://schemas.android.com/apk/res/android";
pub const TOOLS_NS_URI: &str = "http://schemas.android.com/tools";

/// A namespace declared on an element, i.e. `xmlns:android="..."`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: Option<String>,
    pub uri: String,
}

/// The name of an element or attribute.
///
/// Two names are equal when their local name and namespace URI are equal. The prefix is only
/// kept so that the document can be written back the way it was read.
#[derive(Debug, Clone)]
pub struct Name {
    pub local_name: String,
    pub namespace: Option<String>,
    pub prefix: Option<String>,
}

impl Name {
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: None,
            prefix: None,
        }
    }

    /// A name within the `android` namespace.
    pub fn android(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: Some(ANDROID_NS_URI.to_string()),
            prefix: Some("android".to_string()),
        }
    }

    /// A name within the `tools` namespace.
    pub fn tools(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: Some(TOOLS_NS_URI.to_string()),
            prefix: Some("tools".to_string()),
        }
    }

    /// Parses a name written as `android:foo`, `tools:foo` or `foo`.
    /// Any prefix other than `tools` is taken as the `android` namespace. Use
    /// [`Name::from_qualified_in`] when the declared namespaces are known.
    pub fn from_qualified(qualified: &str) -> Self {
        match qualified.split_once(':') {
            Some(("tools", local)) => Self::tools(local),
            Some((_, local)) => Self::android(local),
            None => Self::local(qualified),
        }
    }

    /// Parses a prefixed name, looking the prefix up in `namespaces` (the declarations in scope,
    /// innermost last). Undeclared prefixes fall back to [`Name::from_qualified`].
    pub fn from_qualified_in(qualified: &str, namespaces: &[Namespace]) -> Self {
        if let Some((prefix, local)) = qualified.split_once(':') {
            let declared = namespaces
                .iter()
                .rev()
                .find(|ns| ns.prefix.as_deref() == Some(prefix));
            if let Some(ns) = declared {
                return Self {
                    local_name: local.to_string(),
                    namespace: Some(ns.uri.clone()),
                    prefix: Some(prefix.to_string()),
                };
            }
        }

        Self::from_qualified(qualified)
    }

    pub fn is_tools(&self) -> bool {
        self.namespace.as_deref() == Some(TOOLS_NS_URI)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name && self.namespace == other.namespace
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_name.hash(state);
        self.namespace.hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}:{}", self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

impl From<xml::name::OwnedName> for Name {
    fn from(name: xml::name::OwnedName) -> Self {
        Self {
            local_name: name.local_name,
            namespace: name.namespace,
            prefix: name.prefix,
        }
    }
}

/// Line and column (both starting at 1) of an element within its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Name,
    pub value: String,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: Name,
    /// Namespaces declared by this element (not inherited ones).
    pub namespaces: Vec<Namespace>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>,
    pub position: Position,
}

impl Element {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            position: Position::default(),
        }
    }

    pub fn attribute(&self, name: &Name) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| &attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attribute(&mut self, name: Name, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute {
                name,
                value,
                position: self.position,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_ignore_prefix_when_compared() {
        let mut aliased = Name::android("name");
        aliased.prefix = Some("a".to_string());
        assert_eq!(aliased, Name::android("name"));
        assert_ne!(Name::local("name"), Name::android("name"));
    }

    #[test]
    fn qualified_names() {
        assert!(Name::from_qualified("tools:node").is_tools());
        assert_eq!(Name::from_qualified("android:theme"), Name::android("theme"));
        assert_eq!(Name::from_qualified("package"), Name::local("package"));
        assert_eq!(Name::android("theme").to_string(), "android:theme");
    }

    #[test]
    fn qualified_names_use_declared_prefixes() {
        let dist = "http://schemas.android.com/apk/distribution";
        let namespaces = [
            Namespace {
                prefix: Some("android".to_string()),
                uri: ANDROID_NS_URI.to_string(),
            },
            Namespace {
                prefix: Some("dist".to_string()),
                uri: dist.to_string(),
            },
        ];

        let name = Name::from_qualified_in("dist:module", &namespaces);
        assert_eq!(name.namespace.as_deref(), Some(dist));
        assert_ne!(name, Name::android("module"));
        assert_eq!(Name::from_qualified_in("android:theme", &namespaces), Name::android("theme"));
        // Undeclared prefixes keep the conventional meaning.
        assert!(Name::from_qualified_in("tools:node", &namespaces).is_tools());
    }

    #[test]
    fn set_attribute_replaces_existing_value() {
        let mut element = Element::new(Name::local("activity"));
        element.set_attribute(Name::android("name"), "One");
        element.set_attribute(Name::android("name"), "Two");
        assert_eq!(element.attributes.len(), 1);
        assert_eq!(element.attribute(&Name::android("name")), Some("Two"));
    }
}
