//! Permissions implied by libraries that target older SDK versions.
//!
//! Older platforms granted some permissions implicitly. When a library targeting such a platform is
//! merged into a document targeting a newer one, those permissions are added explicitly so that the
//! library keeps working.

use amm_xml::Name;
use log::info;

use crate::document::{Document, DocumentType};
use crate::model::Registry;
use crate::node::{Node, NodeAttribute, SourcePosition};
use crate::options::MergeOptions;
use crate::report::{ActionType, MergeReport};
use crate::sdk::api_level_of;

pub const WRITE_EXTERNAL_STORAGE: &str = "android.permission.WRITE_EXTERNAL_STORAGE";
pub const READ_EXTERNAL_STORAGE: &str = "android.permission.READ_EXTERNAL_STORAGE";
pub const READ_PHONE_STATE: &str = "android.permission.READ_PHONE_STATE";
pub const READ_CONTACTS: &str = "android.permission.READ_CONTACTS";
pub const WRITE_CONTACTS: &str = "android.permission.WRITE_CONTACTS";
pub const READ_CALL_LOG: &str = "android.permission.READ_CALL_LOG";
pub const WRITE_CALL_LOG: &str = "android.permission.WRITE_CALL_LOG";

const USES_PERMISSION: &str = "uses-permission";

/// Adds the permissions implied by `lower` to `merged`, the result of merging `lower` into a higher
/// priority document. Permissions already present are never added twice, so running this again
/// on its own output changes nothing.
pub fn add_implicit_permissions(
    merged: &Document,
    lower: &Document,
    registry: &Registry,
    options: &MergeOptions,
    report: &mut MergeReport,
) -> Document {
    if !options.add_implicit_permissions {
        return merged.clone();
    }

    let this_target = api_level_of(&merged.target_sdk_version());
    let library_target = api_level_of(&match lower.doc_type() {
        DocumentType::Library => lower.raw_target_sdk_version(),
        _ => lower.target_sdk_version(),
    });
    if this_target <= library_target {
        return merged.clone();
    }

    let library = lower.display_name();
    let requested = |permission: &str| {
        lower
            .get_by_type_and_key(USES_PERMISSION, Some(permission))
            .is_some()
    };

    let mut injector = Injector {
        merged,
        root: merged.root().clone(),
        origin: lower.root().origin.clone(),
        report,
    };

    let mut requests_write_storage = requested(WRITE_EXTERNAL_STORAGE);
    if library_target < 4 {
        let reason = format!("{library} has a targetSdkVersion < 4");
        injector.add_if_absent(WRITE_EXTERNAL_STORAGE, &reason);
        injector.add_if_absent(READ_PHONE_STATE, &reason);
        injector.add_if_absent(READ_EXTERNAL_STORAGE, &reason);
        requests_write_storage = false;
    }

    // Write access to external storage has always come with read access.
    if requests_write_storage {
        injector.add_if_absent(
            READ_EXTERNAL_STORAGE,
            &format!("{library} requested WRITE_EXTERNAL_STORAGE"),
        );
    }

    // Before API 16 the contacts permissions also covered the call log.
    if this_target >= 16 && library_target < 16 {
        for (trigger, implied, trigger_name) in [
            (READ_CONTACTS, READ_CALL_LOG, "READ_CONTACTS"),
            (WRITE_CONTACTS, WRITE_CALL_LOG, "WRITE_CONTACTS"),
        ] {
            if requested(trigger) {
                injector.add_if_absent(
                    implied,
                    &format!("{library} has targetSdkVersion < 16 and requested {trigger_name}"),
                );
            }
        }
    }

    injector.finish(registry)
}

struct Injector<'a> {
    merged: &'a Document,
    root: Node,
    /// Where the permissions come from, for the report.
    origin: SourcePosition,
    report: &'a mut MergeReport,
}

impl Injector<'_> {
    fn add_if_absent(&mut self, permission: &str, reason: &str) {
        let present = self.merged.get_by_type_and_key(USES_PERMISSION, Some(permission)).is_some()
            || self
                .root
                .children_of_type(USES_PERMISSION)
                .any(|node| node.key.as_deref() == Some(permission));
        if present {
            return;
        }

        info!("Adding {permission}: {reason}");
        let mut node = Node::new(
            Name::local(USES_PERMISSION),
            Some(USES_PERMISSION.to_string()),
            self.origin.clone(),
        );
        node.attributes.push(NodeAttribute {
            name: Name::android("name"),
            value: permission.to_string(),
            origin: self.origin.clone(),
        });
        node.key = Some(permission.to_string());

        self.report
            .record_node(&node, ActionType::Implied, None, Some(reason.to_string()));
        self.root.children.push(node);
    }

    fn finish(self, registry: &Registry) -> Document {
        self.merged.with_root(self.root).reindex(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SystemProperties;

    fn load(body: &str, package: &str, doc_type: DocumentType) -> Document {
        let text = format!(
            "<manifest xmlns:android=\"http://schemas.android.com/apk/res/android\" package=\"{package}\">{body}</manifest>"
        );
        Document::parse_str(&text, package, doc_type, SystemProperties::default(), &Registry::android_manifest())
            .unwrap()
    }

    fn permissions(document: &Document) -> Vec<String> {
        document
            .root()
            .children_of_type(USES_PERMISSION)
            .filter_map(|node| node.key.clone())
            .collect()
    }

    #[test]
    fn contacts_imply_call_log_across_api_16() {
        let merged = load(
            r#"<uses-sdk android:minSdkVersion="14" android:targetSdkVersion="21"/>
               <uses-permission android:name="android.permission.READ_CONTACTS"/>"#,
            "com.app",
            DocumentType::Main,
        );
        let lib = load(
            r#"<uses-sdk android:minSdkVersion="9" android:targetSdkVersion="15"/>
               <uses-permission android:name="android.permission.READ_CONTACTS"/>"#,
            "com.lib",
            DocumentType::Library,
        );

        let mut report = MergeReport::new();
        let result = add_implicit_permissions(
            &merged,
            &lib,
            &Registry::android_manifest(),
            &MergeOptions::default(),
            &mut report,
        );
        assert_eq!(permissions(&result), vec![READ_CONTACTS, READ_CALL_LOG]);
        assert_eq!(
            report.actions()[0].reason.as_deref(),
            Some("com.lib has targetSdkVersion < 16 and requested READ_CONTACTS")
        );
    }

    #[test]
    fn nothing_is_implied_when_the_library_targets_the_same_sdk() {
        let merged = load(r#"<uses-sdk android:targetSdkVersion="15"/>"#, "com.app", DocumentType::Main);
        let lib = load(
            r#"<uses-sdk android:targetSdkVersion="15"/>
               <uses-permission android:name="android.permission.WRITE_EXTERNAL_STORAGE"/>"#,
            "com.lib",
            DocumentType::Library,
        );

        let mut report = MergeReport::new();
        let result = add_implicit_permissions(
            &merged,
            &lib,
            &Registry::android_manifest(),
            &MergeOptions::default(),
            &mut report,
        );
        assert!(permissions(&result).is_empty());
        assert!(report.actions().is_empty());
    }

    #[test]
    fn can_be_disabled() {
        let merged = load(r#"<uses-sdk android:targetSdkVersion="30"/>"#, "com.app", DocumentType::Main);
        let lib = load("", "com.lib", DocumentType::Library);
        let options = MergeOptions {
            add_implicit_permissions: false,
            ..Default::default()
        };

        let mut report = MergeReport::new();
        let result = add_implicit_permissions(&merged, &lib, &Registry::android_manifest(), &options, &mut report);
        assert!(permissions(&result).is_empty());
    }
}
