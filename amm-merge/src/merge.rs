//! Pairwise merge of a lower priority document into a higher priority one.

use amm_xml::Namespace;
use log::{debug, info};

use crate::attribute::PolicyError;
use crate::document::{Document, DocumentType};
use crate::error::ErrorKind;
use crate::implicit;
use crate::instructions::{AttributeOperation, NodeOperation};
use crate::model::{ElementModel, MergeType, Registry};
use crate::node::{Node, NodeAttribute};
use crate::options::MergeOptions;
use crate::report::{ActionType, Instruction, MergeReport};
use crate::sdk::{self, SdkCheck};
use crate::validation::{validate_on_read, validate_on_write};

/// Merges `lower` into `higher`, validating both documents and the result.
///
/// Returns the merged document, or `None` if `report` holds an error once the merge is done.
pub fn merge_documents(
    higher: &Document,
    lower: &Document,
    registry: &Registry,
    options: &MergeOptions,
    report: &mut MergeReport,
) -> Option<Document> {
    validate_on_read(higher, registry, report);
    validate_on_read(lower, registry, report);

    let root_id = higher.root().id();
    if higher.doc_type() == DocumentType::Main && report.node_actions(&root_id).is_empty() {
        report.record_subtree(higher.root(), ActionType::Added);
    }

    let merged = merge_into(higher, lower, registry, options, report)?;
    validate_on_write(&merged, registry, report);

    if report.has_errors() {
        None
    } else {
        Some(merged)
    }
}

/// Merges without validating. Returns `None` only if the SDK versions of the two documents are
/// incompatible, in which case nothing was merged.
pub(crate) fn merge_into(
    higher: &Document,
    lower: &Document,
    registry: &Registry,
    options: &MergeOptions,
    report: &mut MergeReport,
) -> Option<Document> {
    info!("Merging {} into {}", lower.source(), higher.source());

    let sdk_check = sdk::check_compatibility(higher, lower, options, report);
    if sdk_check == SdkCheck::Failed {
        return None;
    }

    let mut merger = NodeMerger {
        registry,
        lower,
        report: &mut *report,
    };
    let root = merger.merge_nodes(higher.root(), lower.root(), None);

    let merged = higher
        .with_root(root)
        .reindex(registry)
        .with_namespaces(merge_namespaces(higher.namespaces(), lower.namespaces()));

    if sdk_check == SdkCheck::Passed {
        Some(implicit::add_implicit_permissions(&merged, lower, registry, options, report))
    } else {
        Some(merged)
    }
}

// Namespaces declared on the root of the lower document are kept if the higher document does not declare them.
fn merge_namespaces(higher: &[Namespace], lower: &[Namespace]) -> Vec<Namespace> {
    let mut merged = higher.to_vec();
    for ns in lower {
        let declared = merged
            .iter()
            .any(|existing| existing.uri == ns.uri || existing.prefix == ns.prefix);
        if !declared {
            merged.push(ns.clone());
        }
    }

    merged
}

struct NodeMerger<'a> {
    registry: &'a Registry,
    /// The document being merged in, used to evaluate `tools:selector`.
    lower: &'a Document,
    report: &'a mut MergeReport,
}

impl<'a> NodeMerger<'a> {
    fn model(&self, node: &Node) -> Option<&'a ElementModel> {
        let registry: &'a Registry = self.registry;
        node.element_type.as_deref().and_then(|t| registry.get(t))
    }

    fn same_identity(&self, a: &Node, b: &Node) -> bool {
        if a.element_type.is_none() || a.element_type != b.element_type {
            return false;
        }

        match self.model(a) {
            Some(model) if model.key_resolver().is_keyed() => a.key == b.key,
            _ => true,
        }
    }

    /// Merges two nodes with the same identity.
    /// `reason` is recorded alongside the action describing what happened to `lower`.
    fn merge_nodes(&mut self, higher: &Node, lower: &Node, reason: Option<String>) -> Node {
        let Some(model) = self.model(higher) else {
            return higher.clone();
        };

        if model.merge_type() == MergeType::MergeChildrenOnly {
            let mut merged = higher.shallow_clone();
            merged.children = self.merge_children(higher, lower);
            self.report.record_node(lower, ActionType::Merged, None, reason);
            return merged;
        }

        let operation = higher.instructions.operation_for(self.lower);
        match operation {
            NodeOperation::Replace => {
                debug!("{} at {} replaces {}", higher.id(), higher.origin, lower.origin);
                self.report
                    .record_node(lower, ActionType::Rejected, Some(Instruction::Node(operation)), reason);
                higher.clone()
            }
            NodeOperation::Strict => {
                match higher.compare(lower) {
                    Some(difference) => self.report.error(
                        ErrorKind::MergeConflict,
                        format!(
                            "Node {} at {} is tagged with tools:node=\"strict\", but {}",
                            higher.id(),
                            higher.origin,
                            difference
                        ),
                        Some(lower.origin.clone()),
                    ),
                    None => self.report.record_node(lower, ActionType::Merged, None, reason),
                }
                higher.clone()
            }
            NodeOperation::MergeOnlyAttributes => {
                let mut merged = higher.shallow_clone();
                merged.attributes = self.merge_attributes(model, higher, lower);
                merged.children = higher.children.clone();
                self.report.record_node(lower, ActionType::Merged, None, reason);
                for child in &lower.children {
                    self.report
                        .record_node(child, ActionType::Rejected, Some(Instruction::Node(operation)), None);
                }
                merged
            }
            // Removal instructions are handled by the parent, which owns the siblings to remove.
            NodeOperation::Merge | NodeOperation::Remove | NodeOperation::RemoveAll => {
                let mut merged = higher.shallow_clone();
                merged.attributes = self.merge_attributes(model, higher, lower);
                merged.children = self.merge_children(higher, lower);
                self.report.record_node(lower, ActionType::Merged, None, reason);
                merged
            }
        }
    }

    fn merge_attributes(&mut self, model: &ElementModel, higher: &Node, lower: &Node) -> Vec<NodeAttribute> {
        let mut merged = higher.attributes.clone();

        // Attributes only declared by the higher node are still combined with the lower node's default.
        for attr in merged.iter_mut().filter(|attr| !attr.name.is_tools()) {
            if lower.attribute(&attr.name).is_some() {
                continue;
            }
            let Some(attr_model) = model.attribute_model(&attr.name) else {
                continue;
            };
            if let (Some(default), true) = (attr_model.default(), attr_model.policy().merges_default_values()) {
                if let Ok(value) = attr_model.policy().merge(&attr.value, default) {
                    attr.value = value;
                }
            }
        }

        for low_attr in lower.attributes.iter().filter(|attr| !attr.name.is_tools()) {
            let attr_operation = higher.instructions.attribute_operation(&low_attr.name);
            if attr_operation == Some(AttributeOperation::Remove) {
                self.report.record_attribute(
                    lower,
                    low_attr,
                    ActionType::Rejected,
                    Some(Instruction::Attribute(AttributeOperation::Remove)),
                );
                continue;
            }

            let attr_model = model.attribute_model(&low_attr.name);
            let policy = attr_model.map(|attr_model| attr_model.policy()).unwrap_or_default();
            let Some(index) = merged.iter().position(|attr| attr.name == low_attr.name) else {
                // Only the lower node declares the attribute.
                let default = attr_model
                    .and_then(|attr_model| attr_model.default())
                    .filter(|_| policy.merges_default_values());
                let value = match default {
                    Some(default) => match policy.merge(default, &low_attr.value) {
                        Ok(value) if value == default => None,
                        Ok(value) => Some(value),
                        // Already reported when the lower document was validated.
                        Err(_) => None,
                    },
                    None => Some(low_attr.value.clone()),
                };

                if let Some(value) = value {
                    merged.push(NodeAttribute {
                        name: low_attr.name.clone(),
                        value,
                        origin: low_attr.origin.clone(),
                    });
                    self.report.record_attribute(lower, low_attr, ActionType::Added, None);
                }
                continue;
            };

            let high_attr = &merged[index];
            if high_attr.value == low_attr.value {
                continue;
            }

            match attr_operation {
                Some(AttributeOperation::Replace) => {
                    self.report.record_attribute(
                        lower,
                        low_attr,
                        ActionType::Rejected,
                        Some(Instruction::Attribute(AttributeOperation::Replace)),
                    );
                    continue;
                }
                Some(AttributeOperation::Strict) => {
                    let message = conflict_message(higher, high_attr, lower, low_attr);
                    self.report
                        .error(ErrorKind::MergeConflict, message, Some(low_attr.origin.clone()));
                    continue;
                }
                _ => {}
            }

            match policy.merge(&high_attr.value, &low_attr.value) {
                Ok(value) => {
                    merged[index].value = value;
                    self.report.record_attribute(lower, low_attr, ActionType::Merged, None);
                }
                Err(PolicyError::Conflict) => {
                    let message = conflict_message(higher, high_attr, lower, low_attr);
                    self.report
                        .error(ErrorKind::MergeConflict, message, Some(low_attr.origin.clone()));
                }
                Err(PolicyError::InvalidValue(value)) => {
                    self.report.error(
                        ErrorKind::InvalidAttributeValue,
                        format!(
                            "Attribute {}@{} cannot merge value=({}) from {} with value=({}) from {}: ({}) is not valid",
                            higher.id(),
                            low_attr.name,
                            high_attr.value,
                            high_attr.origin,
                            low_attr.value,
                            low_attr.origin,
                            value
                        ),
                        Some(low_attr.origin.clone()),
                    );
                }
            }
        }

        merged
    }

    fn merge_children(&mut self, higher: &Node, lower: &Node) -> Vec<Node> {
        let mut consumed = vec![false; lower.children.len()];
        let mut merged: Vec<Node> = Vec::with_capacity(higher.children.len() + lower.children.len());

        for child in &higher.children {
            if !child.is_typed() {
                merged.push(child.clone());
                continue;
            }

            if child.instructions.operation.is_removal() {
                // A selector for another document leaves the node without effect, it is not merged with anything either.
                let operation = child.instructions.operation_for(self.lower);
                if operation.is_removal() {
                    self.remove_matching(child, operation, lower, &mut consumed);
                }
                // Kept so that the instruction also applies to the documents merged after this one.
                merged.push(child.clone());
                continue;
            }

            let counterpart = (0..lower.children.len())
                .find(|&i| !consumed[i] && self.same_identity(child, &lower.children[i]));
            let node = match counterpart {
                Some(i) => {
                    consumed[i] = true;
                    self.merge_nodes(child, &lower.children[i], None)
                }
                None => child.clone(),
            };

            match self.find_placed(&merged, &node) {
                Some(existing) => self.absorb(&mut merged, existing, &node),
                None => merged.push(node),
            }
        }

        for (i, candidate) in lower.children.iter().enumerate() {
            if consumed[i] {
                continue;
            }

            match self.find_placed(&merged, candidate) {
                Some(existing) => self.absorb(&mut merged, existing, candidate),
                None => {
                    self.report.record_subtree(candidate, ActionType::Added);
                    merged.push(candidate.clone());
                }
            }
        }

        merged
    }

    fn remove_matching(&mut self, instruction: &Node, operation: NodeOperation, lower: &Node, consumed: &mut [bool]) {
        for (i, candidate) in lower.children.iter().enumerate() {
            let matches = match operation {
                NodeOperation::RemoveAll => candidate.element_type == instruction.element_type,
                _ => self.same_identity(instruction, candidate),
            };
            if matches && !consumed[i] {
                consumed[i] = true;
                self.report
                    .record_node(candidate, ActionType::Rejected, Some(Instruction::Node(operation)), None);
            }
        }
    }

    fn find_placed(&self, placed: &[Node], node: &Node) -> Option<usize> {
        if !node.is_typed() || node.instructions.operation.is_removal() {
            return None;
        }

        placed
            .iter()
            .position(|existing| !existing.instructions.operation.is_removal() && self.same_identity(existing, node))
    }

    // A sibling with the same identity was already placed, the duplicate is merged into it.
    fn absorb(&mut self, placed: &mut [Node], existing: usize, duplicate: &Node) {
        debug!("Absorbing duplicate {} from {}", duplicate.id(), duplicate.origin);
        let reason = format!("duplicate of the declaration at {}", placed[existing].origin);
        let absorbed = self.merge_nodes(&placed[existing], duplicate, Some(reason));
        placed[existing] = absorbed;
    }
}

fn conflict_message(higher: &Node, high_attr: &NodeAttribute, lower: &Node, low_attr: &NodeAttribute) -> String {
    format!(
        "Attribute {}@{} value=({}) from [{}] is also present at [{}] value=({}).\n\
         \tSuggestion: add 'tools:replace=\"{}\"' to <{}> element at {} to override.",
        higher.id(),
        high_attr.name,
        high_attr.value,
        high_attr.origin,
        low_attr.origin,
        low_attr.value,
        low_attr.name,
        lower.name.local_name,
        higher.origin
    )
}

#[cfg(test)]
mod tests {
    use amm_xml::Name;

    use super::*;
    use crate::document::SystemProperties;

    const HEADER: &str = r#"xmlns:android="http://schemas.android.com/apk/res/android" xmlns:tools="http://schemas.android.com/tools""#;

    fn load(body: &str, package: &str, doc_type: DocumentType) -> Document {
        let text = format!("<manifest {HEADER} package=\"{package}\">{body}</manifest>");
        Document::parse_str(
            &text,
            &format!("{package}.xml"),
            doc_type,
            SystemProperties::default(),
            &Registry::android_manifest(),
        )
        .unwrap()
    }

    fn merge(higher: &Document, lower: &Document) -> (Option<Document>, MergeReport) {
        let mut report = MergeReport::new();
        let merged = merge_documents(
            higher,
            lower,
            &Registry::android_manifest(),
            &MergeOptions::default(),
            &mut report,
        );
        (merged, report)
    }

    fn child_types(node: &Node) -> Vec<String> {
        node.children.iter().map(|child| child.id().to_string()).collect()
    }

    #[test]
    fn higher_children_come_first() {
        let main = load(
            r#"<uses-permission android:name="b.B"/><application><activity android:name=".Main"/></application>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<uses-permission android:name="a.A"/><uses-permission android:name="b.B"/>
               <application><activity android:name=".Lib"/></application>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        let merged = merged.unwrap();
        assert!(!report.has_errors());
        assert_eq!(
            child_types(merged.root()),
            vec!["uses-permission#b.B", "application", "uses-permission#a.A"]
        );
        let application = merged.get_by_type_and_key("application", None).unwrap();
        assert_eq!(
            child_types(application),
            vec!["activity#com.app.Main", "activity#com.lib.Lib"]
        );
    }

    #[test]
    fn conflicting_values_are_errors_unless_replaced() {
        let main = load(
            r#"<application android:label="Main" android:icon="@mipmap/main" tools:replace="android:icon"/>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<application android:label="Lib" android:icon="@mipmap/lib" android:allowBackup="true"/>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        assert!(merged.is_none());
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, Some(ErrorKind::MergeConflict));
        assert!(errors[0].message.contains("android:label"));
        assert!(errors[0].message.contains("tools:replace=\"android:label\""));
    }

    #[test]
    fn replace_and_remove_attributes() {
        let main = load(
            r#"<application android:icon="@mipmap/main" tools:replace="android:icon" tools:remove="android:theme"/>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<application android:icon="@mipmap/lib" android:theme="@style/Lib" android:allowBackup="true"/>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        let merged = merged.unwrap();
        let application = merged.get_by_type_and_key("application", None).unwrap();
        assert_eq!(application.attribute_value(&Name::android("icon")), Some("@mipmap/main"));
        assert_eq!(application.attribute_value(&Name::android("theme")), None);
        assert_eq!(application.attribute_value(&Name::android("allowBackup")), Some("true"));

        let rejected = report.attribute_actions(&application.id(), &Name::android("theme"));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].action_type, ActionType::Rejected);
        assert_eq!(
            rejected[0].instruction,
            Some(Instruction::Attribute(AttributeOperation::Remove))
        );
    }

    #[test]
    fn remove_instructions_drop_lower_nodes() {
        let main = load(
            r#"<uses-permission android:name="a.CAMERA" tools:node="remove"/>
               <uses-feature android:name="x" tools:node="removeAll"/>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<uses-permission android:name="a.CAMERA"/><uses-permission android:name="a.INTERNET"/>
               <uses-feature android:name="gps"/><uses-feature android:name="nfc"/>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        let merged = merged.unwrap();
        assert!(merged.get_by_type_and_key("uses-permission", Some("a.CAMERA")).is_none());
        assert!(merged.get_by_type_and_key("uses-permission", Some("a.INTERNET")).is_some());
        assert!(merged.get_by_type_and_key("uses-feature", Some("gps")).is_none());
        assert!(merged.get_by_type_and_key("uses-feature", Some("nfc")).is_none());

        let rejected = report
            .actions()
            .iter()
            .filter(|action| action.action_type == ActionType::Rejected)
            .count();
        assert_eq!(rejected, 3);
        // The instruction nodes stay until the tools instructions are cleaned.
        assert_eq!(merged.root().children.len(), 3);
    }

    #[test]
    fn selectors_limit_instructions() {
        let main = load(
            r#"<uses-permission android:name="a.CAMERA" tools:node="remove" tools:selector="com.other"/>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<uses-permission android:name="a.CAMERA"/>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, _) = merge(&main, &lib);
        let merged = merged.unwrap();
        assert!(merged.get_by_type_and_key("uses-permission", Some("a.CAMERA")).is_some());
    }

    #[test]
    fn replace_keeps_the_higher_subtree() {
        let main = load(
            r#"<application><activity android:name=".Main" android:exported="false" tools:node="replace"/></application>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<application><activity android:name="com.app.Main" android:exported="true">
                 <intent-filter><action android:name="VIEW"/></intent-filter>
               </activity></application>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        assert!(!report.has_errors());
        let merged = merged.unwrap();
        let activity = merged.get_by_type_and_key("activity", Some("com.app.Main")).unwrap();
        assert_eq!(activity.attribute_value(&Name::android("exported")), Some("false"));
        assert!(activity.children.is_empty());
    }

    #[test]
    fn strict_nodes_must_match() {
        let main = load(
            r#"<application><activity android:name=".Main" android:exported="false" tools:node="strict"/></application>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<application><activity android:name="com.app.Main" android:exported="true"/></application>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        assert!(merged.is_none());
        assert!(report.has_error_kind(&ErrorKind::MergeConflict));
    }

    #[test]
    fn merge_only_attributes_rejects_lower_children() {
        let main = load(
            r#"<application><activity android:name=".Main" tools:node="mergeOnlyAttributes"/></application>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<application><activity android:name="com.app.Main" android:theme="@style/T">
                 <meta-data android:name="m" android:value="v"/>
               </activity></application>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, _) = merge(&main, &lib);
        let merged = merged.unwrap();
        let activity = merged.get_by_type_and_key("activity", Some("com.app.Main")).unwrap();
        assert_eq!(activity.attribute_value(&Name::android("theme")), Some("@style/T"));
        assert!(activity.children.is_empty());
    }

    #[test]
    fn intent_filters_match_on_their_whole_content() {
        let main = load(
            r#"<application><activity android:name=".Main">
                 <intent-filter><action android:name="VIEW"/><category android:name="DEFAULT"/></intent-filter>
               </activity></application>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<application><activity android:name="com.app.Main">
                 <intent-filter><category android:name="DEFAULT"/><action android:name="VIEW"/></intent-filter>
                 <intent-filter><action android:name="VIEW"/><category android:name="DEFAULT"/>
                   <data android:scheme="https"/></intent-filter>
               </activity></application>"#,
            "com.lib",
            DocumentType::Library,
        );

        let (merged, report) = merge(&main, &lib);
        assert!(!report.has_errors());
        let merged = merged.unwrap();
        let activity = merged.get_by_type_and_key("activity", Some("com.app.Main")).unwrap();
        let filters: Vec<&Node> = activity.children_of_type("intent-filter").collect();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].children.len(), 2);
        assert_eq!(filters[1].children.len(), 3);
    }

    #[test]
    fn lower_namespaces_are_kept() {
        let main = load("", "com.app", DocumentType::Main);
        let lib = Document::parse_str(
            r#"<manifest xmlns:dist="http://schemas.android.com/apk/distribution" package="com.lib"/>"#,
            "lib.xml",
            DocumentType::Library,
            SystemProperties::default(),
            &Registry::android_manifest(),
        )
        .unwrap();

        let (merged, _) = merge(&main, &lib);
        let merged = merged.unwrap();
        assert!(merged
            .namespaces()
            .iter()
            .any(|ns| ns.prefix.as_deref() == Some("dist")));
    }
}
