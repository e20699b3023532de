use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::OnceLock;

use amm_xml::{Element, Name, Namespace};
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::attribute::expand_class_name;
use crate::error::ErrorKind;
use crate::instructions::NodeInstructions;
use crate::model::{Registry, UnknownElementPolicy};
use crate::node::{Node, NodeAttribute, NodeId, SourcePosition};
use crate::sdk::DEFAULT_SDK_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    /// The manifest of the application (or library) being built.
    Main,
    /// A flavor or build type manifest, with higher priority than the main manifest's dependencies.
    Overlay,
    /// The manifest of a dependency.
    Library,
}

/// Values provided by the build system which take precedence over those declared in the main manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemProperties {
    pub package: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
    pub min_sdk_version: Option<String>,
    pub target_sdk_version: Option<String>,
    pub max_sdk_version: Option<String>,
}

/// A manifest loaded into a tree of [`Node`]s.
///
/// Documents are never modified. Merging creates a new document, and so does [`Document::reindex`].
/// The index used to look nodes up by type and key is built the first time it is needed.
#[derive(Debug, Clone)]
pub struct Document {
    source: String,
    doc_type: DocumentType,
    package: Option<String>,
    namespaces: Vec<Namespace>,
    root: Node,
    properties: SystemProperties,
    index: OnceLock<HashMap<NodeId, Vec<usize>>>,
}

impl Document {
    /// Builds a document from a parsed element tree.
    /// `source` identifies the document in the report, typically its path.
    pub fn load(
        element: &Element,
        source: &str,
        doc_type: DocumentType,
        properties: SystemProperties,
        registry: &Registry,
    ) -> Result<Self> {
        let package = element
            .attribute(&Name::local("package"))
            .map(str::to_string)
            .or_else(|| properties.package.clone());

        let builder = NodeBuilder {
            registry,
            source,
            package: package.as_deref(),
        };
        let root = builder.build(element, &[])?;
        debug!("Loaded {source} ({doc_type:?}, package {package:?})");

        Ok(Self {
            source: source.to_string(),
            doc_type,
            package,
            namespaces: element.namespaces.clone(),
            root,
            properties,
            index: OnceLock::new(),
        })
    }

    pub fn parse_str(
        text: &str,
        source: &str,
        doc_type: DocumentType,
        properties: SystemProperties,
        registry: &Registry,
    ) -> Result<Self> {
        let element = amm_xml::parse_str(text).with_context(|| format!("Parsing {source}"))?;
        Self::load(&element, source, doc_type, properties, registry)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        source: &str,
        doc_type: DocumentType,
        properties: SystemProperties,
        registry: &Registry,
    ) -> Result<Self> {
        let element = amm_xml::parse_document(reader).with_context(|| format!("Parsing {source}"))?;
        Self::load(&element, source, doc_type, properties, registry)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    /// The package declared by the manifest, or the injected one.
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Name used for this document in messages.
    pub fn display_name(&self) -> &str {
        self.package().unwrap_or(&self.source)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn properties(&self) -> &SystemProperties {
        &self.properties
    }

    /// A new document with the same identity as this one but a different tree.
    pub fn with_root(&self, root: Node) -> Document {
        Self {
            source: self.source.clone(),
            doc_type: self.doc_type,
            package: self.package.clone(),
            namespaces: self.namespaces.clone(),
            root,
            properties: self.properties.clone(),
            index: OnceLock::new(),
        }
    }

    /// Recomputes the key of every node and drops the index, so that the document reflects
    /// changes made to its tree.
    pub fn reindex(self, registry: &Registry) -> Document {
        let mut root = self.root;
        assign_keys(&mut root, registry);
        Self {
            root,
            index: OnceLock::new(),
            ..self
        }
    }

    fn index(&self) -> &HashMap<NodeId, Vec<usize>> {
        self.index.get_or_init(|| {
            let mut index = HashMap::new();
            let mut path = Vec::new();
            index_node(&self.root, &mut path, &mut index);
            index
        })
    }

    /// Finds the first node with the given type and key.
    /// Nodes that only exist to remove others are not returned.
    pub fn get_by_type_and_key(&self, element_type: &str, key: Option<&str>) -> Option<&Node> {
        let path = self.index().get(&NodeId::new(element_type, key))?;
        let mut node = &self.root;
        for &child in path {
            node = node.children.get(child)?;
        }
        Some(node)
    }

    pub fn uses_sdk(&self) -> Option<&Node> {
        self.root.children_of_type("uses-sdk").next()
    }

    fn explicit_sdk_value(&self, name: &str) -> Option<String> {
        self.uses_sdk()?
            .attribute_value(&Name::android(name))
            .map(str::to_string)
    }

    // Libraries are not affected by the values injected into the build being merged.
    fn injected(&self, value: &Option<String>) -> Option<String> {
        match self.doc_type {
            DocumentType::Library => None,
            _ => value.clone(),
        }
    }

    pub fn explicit_min_sdk_version(&self) -> Option<String> {
        self.explicit_sdk_value("minSdkVersion")
    }

    pub fn explicit_min_sdk_version_or_default(&self) -> String {
        self.explicit_min_sdk_version()
            .unwrap_or_else(|| DEFAULT_SDK_VERSION.to_string())
    }

    pub fn explicit_target_sdk_version(&self) -> Option<String> {
        self.explicit_sdk_value("targetSdkVersion")
    }

    pub fn explicit_max_sdk_version(&self) -> Option<String> {
        self.explicit_sdk_value("maxSdkVersion")
    }

    /// The injected minSdkVersion, or else the declared one, or else the default.
    pub fn min_sdk_version(&self) -> String {
        self.injected(&self.properties.min_sdk_version)
            .unwrap_or_else(|| self.explicit_min_sdk_version_or_default())
    }

    /// The injected targetSdkVersion, or else the declared one, or else the minSdkVersion.
    pub fn target_sdk_version(&self) -> String {
        self.injected(&self.properties.target_sdk_version)
            .or_else(|| self.explicit_target_sdk_version())
            .unwrap_or_else(|| self.min_sdk_version())
    }

    /// The targetSdkVersion implied by the document alone, ignoring injected values.
    pub fn raw_target_sdk_version(&self) -> String {
        self.explicit_target_sdk_version()
            .unwrap_or_else(|| self.explicit_min_sdk_version_or_default())
    }

    pub fn max_sdk_version(&self) -> Option<String> {
        self.injected(&self.properties.max_sdk_version)
            .or_else(|| self.explicit_max_sdk_version())
    }

    /// Describes the first structural difference with `other`, ignoring tools attributes and positions.
    pub fn compare(&self, other: &Document) -> Option<String> {
        self.root.compare(&other.root)
    }

    pub fn to_element(&self) -> Element {
        let mut element = self.root.to_element();
        element.namespaces = self.namespaces.clone();
        element
    }

    pub(crate) fn with_namespaces(mut self, namespaces: Vec<Namespace>) -> Document {
        self.namespaces = namespaces;
        self
    }

    pub fn write<W: Write>(&self, out: W) -> Result<()> {
        amm_xml::write_document(&self.to_element(), out)
    }

    pub fn to_xml_string(&self) -> Result<String> {
        amm_xml::to_string(&self.to_element())
    }
}

struct NodeBuilder<'a> {
    registry: &'a Registry,
    source: &'a str,
    package: Option<&'a str>,
}

impl NodeBuilder<'_> {
    // `inherited` holds the namespaces declared by the ancestors of `element`.
    fn build(&self, element: &Element, inherited: &[Namespace]) -> Result<Node> {
        let local_name = &element.name.local_name;
        let mut in_scope = inherited.to_vec();
        in_scope.extend(element.namespaces.iter().cloned());
        let origin = SourcePosition::new(self.source, element.position);
        let model = match self.registry.lookup(local_name) {
            Ok(model) => Some(model),
            Err(kind) => match self.registry.unknown_elements() {
                UnknownElementPolicy::Reject => {
                    return Err(anyhow::Error::new(kind).context(format!("Unknown element at {origin}")))
                }
                UnknownElementPolicy::PassThrough => {
                    debug!("Passing through unknown element <{local_name}> at {origin}");
                    None
                }
            },
        };

        let mut node = Node::new(element.name.clone(), model.map(|model| model.name().to_string()), origin);
        for attr in &element.attributes {
            let package_dependent = model
                .and_then(|model| model.attribute_model(&attr.name))
                .is_some_and(|attr_model| attr_model.is_package_dependent());
            let value = match self.package {
                Some(package) if package_dependent => expand_class_name(package, &attr.value),
                _ => attr.value.clone(),
            };

            node.attributes.push(NodeAttribute {
                name: attr.name.clone(),
                value,
                origin: SourcePosition::new(self.source, attr.position),
            });
        }

        node.instructions = NodeInstructions::parse(&node.attributes, &in_scope).map_err(|err| {
            anyhow::Error::new(ErrorKind::IllegalToolsInstruction).context(format!("{err} at {}", node.origin))
        })?;
        node.children = element
            .children
            .iter()
            .map(|child| self.build(child, &in_scope))
            .collect::<Result<_>>()?;
        node.key = model.and_then(|model| model.key_resolver().resolve(&node));

        Ok(node)
    }
}

fn assign_keys(node: &mut Node, registry: &Registry) {
    for child in &mut node.children {
        assign_keys(child, registry);
    }

    let resolver = node
        .element_type
        .as_deref()
        .and_then(|element_type| registry.get(element_type))
        .map(|model| model.key_resolver());
    if let Some(resolver) = resolver {
        node.key = resolver.resolve(node);
    }
}

fn index_node(node: &Node, path: &mut Vec<usize>, index: &mut HashMap<NodeId, Vec<usize>>) {
    if !node.is_typed() || node.instructions.operation.is_removal() {
        return;
    }

    index.entry(node.id()).or_insert_with(|| path.clone());
    for (i, child) in node.children.iter().enumerate() {
        path.push(i);
        index_node(child, path, index);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"
        xmlns:tools="http://schemas.android.com/tools"
        package="com.example.app">
    <uses-sdk android:minSdkVersion="15" />
    <application android:name=".App">
        <activity android:name=".MainActivity" />
        <service android:name="Sync" />
        <receiver android:name="org.lib.Receiver" />
        <activity android:name="com.example.app.Gone" tools:node="remove" />
    </application>
</manifest>"#;

    fn load(text: &str, doc_type: DocumentType, properties: SystemProperties) -> Result<Document> {
        Document::parse_str(text, "AndroidManifest.xml", doc_type, properties, &Registry::android_manifest())
    }

    #[test]
    fn expands_class_names_before_computing_keys() {
        let doc = load(MANIFEST, DocumentType::Main, SystemProperties::default()).unwrap();
        assert_eq!(doc.package(), Some("com.example.app"));

        let activity = doc
            .get_by_type_and_key("activity", Some("com.example.app.MainActivity"))
            .unwrap();
        assert!(activity.origin.line > doc.root().origin.line);
        assert!(doc.get_by_type_and_key("service", Some("com.example.app.Sync")).is_some());
        assert!(doc.get_by_type_and_key("receiver", Some("org.lib.Receiver")).is_some());

        let application = doc.get_by_type_and_key("application", None).unwrap();
        assert_eq!(application.attribute_value(&Name::android("name")), Some("com.example.app.App"));
    }

    #[test]
    fn removal_instructions_are_not_indexed() {
        let doc = load(MANIFEST, DocumentType::Main, SystemProperties::default()).unwrap();
        assert!(doc.get_by_type_and_key("activity", Some("com.example.app.Gone")).is_none());
    }

    #[test]
    fn effective_sdk_versions() {
        let doc = load(MANIFEST, DocumentType::Main, SystemProperties::default()).unwrap();
        assert_eq!(doc.min_sdk_version(), "15");
        assert_eq!(doc.target_sdk_version(), "15");
        assert_eq!(doc.max_sdk_version(), None);

        let injected = SystemProperties {
            min_sdk_version: Some("21".to_string()),
            target_sdk_version: Some("34".to_string()),
            ..Default::default()
        };
        let doc = load(MANIFEST, DocumentType::Main, injected.clone()).unwrap();
        assert_eq!(doc.min_sdk_version(), "21");
        assert_eq!(doc.target_sdk_version(), "34");
        assert_eq!(doc.raw_target_sdk_version(), "15");

        // Libraries only use what they declare.
        let library = load(MANIFEST, DocumentType::Library, injected).unwrap();
        assert_eq!(library.min_sdk_version(), "15");
        assert_eq!(library.target_sdk_version(), "15");
    }

    #[test]
    fn missing_uses_sdk_uses_defaults() {
        let doc = load("<manifest package=\"a.b\"/>", DocumentType::Library, SystemProperties::default()).unwrap();
        assert_eq!(doc.min_sdk_version(), "1");
        assert_eq!(doc.raw_target_sdk_version(), "1");
    }

    #[test]
    fn unknown_elements_follow_the_registry_policy() {
        let text = "<manifest package=\"a.b\"><nav-graph value=\"x\"/></manifest>";
        let error = load(text, DocumentType::Main, SystemProperties::default()).unwrap_err();
        assert_eq!(
            error.downcast_ref::<ErrorKind>(),
            Some(&ErrorKind::UnknownElementKind("nav-graph".to_string()))
        );

        let registry = Registry::android_manifest().with_unknown_elements(UnknownElementPolicy::PassThrough);
        let doc = Document::parse_str(text, "m.xml", DocumentType::Main, SystemProperties::default(), &registry).unwrap();
        assert!(!doc.root().children[0].is_typed());
    }

    #[test]
    fn illegal_tools_node_values_fail_the_load() {
        let text = r#"<manifest xmlns:tools="http://schemas.android.com/tools" package="a.b">
            <application tools:node="delete"/>
        </manifest>"#;
        let error = load(text, DocumentType::Main, SystemProperties::default()).unwrap_err();
        assert_eq!(error.downcast_ref::<ErrorKind>(), Some(&ErrorKind::IllegalToolsInstruction));
    }

    #[test]
    fn tools_attribute_lists_use_the_document_prefixes() {
        let text = r#"<manifest xmlns:tools="http://schemas.android.com/tools"
            xmlns:dist="http://schemas.android.com/apk/distribution" package="a.b">
            <application tools:remove="dist:module,android:label"/>
        </manifest>"#;
        let doc = load(text, DocumentType::Main, SystemProperties::default()).unwrap();
        let application = doc.get_by_type_and_key("application", None).unwrap();

        let module = Name {
            local_name: "module".to_string(),
            namespace: Some("http://schemas.android.com/apk/distribution".to_string()),
            prefix: None,
        };
        assert!(application.instructions.attribute_operation(&module).is_some());
        assert!(application.instructions.attribute_operation(&Name::android("module")).is_none());
        assert!(application.instructions.attribute_operation(&Name::android("label")).is_some());
    }

    #[test]
    fn writes_back_to_xml() {
        let doc = load(MANIFEST, DocumentType::Main, SystemProperties::default()).unwrap();
        let text = doc.to_xml_string().unwrap();
        assert!(text.contains("android:name=\"com.example.app.MainActivity\""));
        assert!(text.contains("xmlns:tools=\"http://schemas.android.com/tools\""));
    }
}
