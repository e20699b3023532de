use amm_xml::Name;

use crate::node::Node;

/// Computes the key that identifies a node among its siblings of the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolver {
    /// The element type occurs at most once under its parent.
    NoKey,
    /// The key is the value of these attributes, joined with `+`.
    /// A missing attribute contributes an empty string.
    Attributes(Vec<Name>),
    /// The key describes the children of the listed element types, each one by its type and
    /// all of its attributes. Descriptions are sorted so that declaration order does not matter.
    Children(Vec<String>),
}

impl KeyResolver {
    /// Key on `android:name`, the most common case.
    pub fn name() -> Self {
        Self::Attributes(vec![Name::android("name")])
    }

    pub fn attributes(names: &[&str]) -> Self {
        Self::Attributes(names.iter().map(|name| Name::android(*name)).collect())
    }

    pub fn is_keyed(&self) -> bool {
        !matches!(self, Self::NoKey)
    }

    pub fn resolve(&self, node: &Node) -> Option<String> {
        match self {
            Self::NoKey => None,
            Self::Attributes(names) => {
                let values: Vec<&str> = names
                    .iter()
                    .map(|name| node.attribute_value(name).unwrap_or(""))
                    .collect();
                Some(values.join("+"))
            }
            Self::Children(types) => {
                let mut values: Vec<String> = node
                    .children
                    .iter()
                    .filter(|child| types.iter().any(|t| t == &child.name.local_name))
                    .map(describe_child)
                    .collect();
                values.sort_unstable();
                values.dedup();
                Some(values.join("+"))
            }
        }
    }
}

// e.g. `data:host=example.com,scheme=https`
fn describe_child(child: &Node) -> String {
    let mut attributes: Vec<String> = child
        .attributes
        .iter()
        .filter(|attr| !attr.name.is_tools())
        .map(|attr| format!("{}={}", attr.name.local_name, attr.value))
        .collect();
    attributes.sort_unstable();
    format!("{}:{}", child.name.local_name, attributes.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeAttribute, SourcePosition};

    fn node(local_name: &str, attributes: &[(&str, &str)]) -> Node {
        let mut node = Node::new(Name::local(local_name), Some(local_name.to_string()), SourcePosition::default());
        for (name, value) in attributes {
            node.attributes.push(NodeAttribute {
                name: Name::android(*name),
                value: value.to_string(),
                origin: SourcePosition::default(),
            });
        }
        node
    }

    #[test]
    fn attribute_keys() {
        let activity = node("activity", &[("name", "com.example.Main")]);
        assert_eq!(KeyResolver::name().resolve(&activity), Some("com.example.Main".to_string()));
        assert_eq!(KeyResolver::NoKey.resolve(&activity), None);

        let data = node("data", &[("scheme", "https"), ("host", "example.com")]);
        let resolver = KeyResolver::attributes(&["scheme", "host", "port"]);
        assert_eq!(resolver.resolve(&data), Some("https+example.com+".to_string()));
    }

    #[test]
    fn child_keys_ignore_order() {
        let resolver = KeyResolver::Children(vec!["action".to_string(), "category".to_string(), "data".to_string()]);

        let mut first = node("intent-filter", &[]);
        first.children.push(node("action", &[("name", "VIEW")]));
        first.children.push(node("category", &[("name", "DEFAULT")]));
        first.children.push(node("data", &[("scheme", "https"), ("host", "a.com")]));

        let mut second = node("intent-filter", &[]);
        second.children.push(node("data", &[("host", "a.com"), ("scheme", "https")]));
        second.children.push(node("category", &[("name", "DEFAULT")]));
        second.children.push(node("action", &[("name", "VIEW")]));

        assert_eq!(
            resolver.resolve(&first),
            Some("action:name=VIEW+category:name=DEFAULT+data:host=a.com,scheme=https".to_string())
        );
        assert_eq!(resolver.resolve(&first), resolver.resolve(&second));
    }

    #[test]
    fn child_keys_tell_apart_different_data() {
        let resolver = KeyResolver::Children(vec!["action".to_string(), "category".to_string(), "data".to_string()]);
        let filter = |scheme: &str, host: &str| {
            let mut filter = node("intent-filter", &[]);
            filter.children.push(node("action", &[("name", "VIEW")]));
            filter.children.push(node("category", &[("name", "DEFAULT")]));
            filter.children.push(node("data", &[("scheme", scheme), ("host", host)]));
            filter
        };

        assert_ne!(
            resolver.resolve(&filter("https", "a.com")),
            resolver.resolve(&filter("myapp", "b"))
        );
    }
}
