use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use amm_xml::Name;
use anyhow::{Context, Result};
use log::{info, warn};

use crate::cleaner::clean_tools_references;
use crate::document::{Document, DocumentType, SystemProperties};
use crate::error::ErrorKind;
use crate::merge::merge_into;
use crate::model::Registry;
use crate::node::Node;
use crate::options::MergeOptions;
use crate::placeholder;
use crate::report::{ActionType, MergeReport, Record, Severity};
use crate::validation::{validate_on_read, validate_on_write};

/// Result of [`ManifestMerger::merge`].
#[derive(Debug)]
pub struct MergeOutcome {
    /// The merged manifest, `None` if the report contains errors.
    pub document: Option<Document>,
    pub report: MergeReport,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        self.document.is_some()
    }
}

/// Merges a main manifest with its overlays and libraries.
pub struct ManifestMerger {
    registry: Registry,
    options: MergeOptions,
}

impl ManifestMerger {
    pub fn new(registry: Registry, options: MergeOptions) -> Self {
        Self { registry, options }
    }

    /// A merger for Android manifests, handling unknown elements as `options` says.
    pub fn android(options: MergeOptions) -> Self {
        let registry = Registry::android_manifest().with_unknown_elements(options.unknown_elements);
        Self::new(registry, options)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn load_str(
        &self,
        text: &str,
        source: &str,
        doc_type: DocumentType,
        properties: SystemProperties,
    ) -> Result<Document> {
        Document::parse_str(text, source, doc_type, properties, &self.registry)
    }

    pub fn load_file(&self, path: &Path, doc_type: DocumentType, properties: SystemProperties) -> Result<Document> {
        let file = File::open(path).with_context(|| format!("Opening manifest {path:?}"))?;
        Document::from_reader(
            BufReader::new(file),
            &path.display().to_string(),
            doc_type,
            properties,
            &self.registry,
        )
    }

    /// Merges `documents`, given in descending priority: the main manifest, then its overlays,
    /// then its libraries.
    ///
    /// A library that cannot be merged (for instance because of its minSdkVersion) is skipped,
    /// the others are still merged so that the report lists every problem.
    pub fn merge(&self, documents: Vec<Document>) -> MergeOutcome {
        let mut report = MergeReport::new();
        let mut documents = documents.into_iter();
        let Some(main) = documents.next() else {
            report.push(Record {
                severity: Severity::Error,
                kind: None,
                message: "No manifest to merge".to_string(),
                position: None,
            });
            return MergeOutcome { document: None, report };
        };

        if !check_top_level_declarations(&main, &mut report) {
            return MergeOutcome { document: None, report };
        }

        validate_on_read(&main, &self.registry, &mut report);
        report.record_subtree(main.root(), ActionType::Added);

        let mut merged = main;
        for lower in documents {
            validate_on_read(&lower, &self.registry, &mut report);
            match merge_into(&merged, &lower, &self.registry, &self.options, &mut report) {
                Some(result) => merged = result,
                None => warn!("{} was not merged", lower.source()),
            }
        }

        validate_on_write(&merged, &self.registry, &mut report);
        let merged = inject_system_properties(&merged, &self.registry, &mut report);
        let merged = placeholder::substitute(
            &merged,
            &self.placeholder_values(&merged),
            self.options.output,
            &self.registry,
            &mut report,
        );
        let cleaned = clean_tools_references(&merged, self.options.output, &mut report);

        let document = if report.has_errors() {
            info!("Merge failed with {} error(s)", report.errors().count());
            None
        } else {
            info!("Merge succeeded");
            cleaned
        };

        MergeOutcome { document, report }
    }

    fn placeholder_values(&self, merged: &Document) -> BTreeMap<String, String> {
        let mut values = self.options.placeholders.clone();
        if let Some(package) = merged.package() {
            for name in ["applicationId", "packageName"] {
                values.entry(name.to_string()).or_insert_with(|| package.to_string());
            }
        }

        values
    }
}

/// Checks the main manifest before anything is merged into it.
/// Returns false if the merge cannot go ahead.
fn check_top_level_declarations(main: &Document, report: &mut MergeReport) -> bool {
    if main.doc_type() != DocumentType::Overlay && main.package().is_none() {
        report.error(
            ErrorKind::MissingPackageDeclaration,
            format!("Main manifest {} is missing the package attribute", main.source()),
            Some(main.root().origin.clone()),
        );
        return false;
    }

    let properties = main.properties();
    let declared = [
        ("minSdkVersion", &properties.min_sdk_version, main.explicit_min_sdk_version()),
        ("targetSdkVersion", &properties.target_sdk_version, main.explicit_target_sdk_version()),
        ("maxSdkVersion", &properties.max_sdk_version, main.explicit_max_sdk_version()),
    ];
    for (name, injected, explicit) in declared {
        if let (Some(injected), Some(explicit)) = (injected, explicit) {
            if *injected != explicit {
                report.warning(
                    format!(
                        "uses-sdk:{name} value ({explicit}) specified in the manifest file is ignored. \
                         It is overridden by the value declared in the build ({injected})."
                    ),
                    main.uses_sdk().map(|node| node.origin.clone()),
                );
            }
        }
    }

    true
}

/// Writes the values provided by the build into the merged manifest.
fn inject_system_properties(merged: &Document, registry: &Registry, report: &mut MergeReport) -> Document {
    let properties = merged.properties();
    if merged.doc_type() == DocumentType::Library || *properties == SystemProperties::default() {
        return merged.clone();
    }

    let mut root = merged.root().clone();
    let root_attributes = [
        (Name::local("package"), &properties.package),
        (Name::android("versionCode"), &properties.version_code),
        (Name::android("versionName"), &properties.version_name),
    ];
    for (name, value) in root_attributes {
        if let Some(value) = value {
            inject(&mut root, name, value, report);
        }
    }

    let sdk_attributes = [
        (Name::android("minSdkVersion"), &properties.min_sdk_version),
        (Name::android("targetSdkVersion"), &properties.target_sdk_version),
        (Name::android("maxSdkVersion"), &properties.max_sdk_version),
    ];
    if sdk_attributes.iter().any(|(_, value)| value.is_some()) {
        let index = match root.children.iter().position(|child| child.element_type.as_deref() == Some("uses-sdk")) {
            Some(index) => index,
            None => {
                let uses_sdk = Node::new(Name::local("uses-sdk"), Some("uses-sdk".to_string()), root.origin.clone());
                report.record_node(&uses_sdk, ActionType::Injected, None, None);
                root.children.insert(0, uses_sdk);
                0
            }
        };

        for (name, value) in sdk_attributes {
            if let Some(value) = value {
                inject(&mut root.children[index], name, value, report);
            }
        }
    }

    merged.with_root(root).reindex(registry)
}

fn inject(node: &mut Node, name: Name, value: &str, report: &mut MergeReport) {
    if node.attribute_value(&name) == Some(value) {
        return;
    }

    let origin = node.origin.clone();
    node.set_attribute(name.clone(), value, origin);
    if let Some(attr) = node.attribute(&name) {
        report.record_attribute(node, attr, ActionType::Injected, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.app">
        <uses-sdk android:minSdkVersion="21" android:targetSdkVersion="30"/>
        <application android:label="${appName}"/>
    </manifest>"#;

    fn merger(placeholders: &[(&str, &str)]) -> ManifestMerger {
        let options = MergeOptions {
            placeholders: placeholders
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            ..Default::default()
        };
        ManifestMerger::android(options)
    }

    #[test]
    fn missing_package_stops_the_merge() {
        let merger = merger(&[]);
        let main = merger
            .load_str("<manifest/>", "main.xml", DocumentType::Main, SystemProperties::default())
            .unwrap();
        let outcome = merger.merge(vec![main]);
        assert!(!outcome.is_success());
        assert!(outcome.report.has_error_kind(&ErrorKind::MissingPackageDeclaration));

        // An injected package is enough.
        let properties = SystemProperties {
            package: Some("com.injected".to_string()),
            ..Default::default()
        };
        let main = merger
            .load_str("<manifest/>", "main.xml", DocumentType::Main, properties)
            .unwrap();
        let outcome = merger.merge(vec![main]);
        assert!(outcome.is_success());
        assert_eq!(
            outcome
                .document
                .unwrap()
                .root()
                .attribute_value(&Name::local("package")),
            Some("com.injected")
        );
    }

    #[test]
    fn injected_values_override_declared_ones() {
        let merger = merger(&[("appName", "App")]);
        let properties = SystemProperties {
            min_sdk_version: Some("24".to_string()),
            version_code: Some("7".to_string()),
            ..Default::default()
        };
        let main = merger
            .load_str(MAIN, "main.xml", DocumentType::Main, properties)
            .unwrap();

        let outcome = merger.merge(vec![main]);
        assert_eq!(outcome.report.warnings().count(), 1);
        let document = outcome.document.unwrap();
        assert_eq!(document.root().attribute_value(&Name::android("versionCode")), Some("7"));
        let uses_sdk = document.uses_sdk().unwrap();
        assert_eq!(uses_sdk.attribute_value(&Name::android("minSdkVersion")), Some("24"));
        assert_eq!(uses_sdk.attribute_value(&Name::android("targetSdkVersion")), Some("30"));

        let injected = outcome
            .report
            .actions()
            .iter()
            .filter(|action| action.action_type == ActionType::Injected)
            .count();
        assert_eq!(injected, 2);
    }

    #[test]
    fn unresolved_placeholders_fail_the_merge() {
        let merger = merger(&[]);
        let main = merger
            .load_str(MAIN, "main.xml", DocumentType::Main, SystemProperties::default())
            .unwrap();
        let outcome = merger.merge(vec![main]);
        assert!(outcome.document.is_none());
        assert!(outcome.report.has_error_kind(&ErrorKind::UnresolvedPlaceholder));
    }

    #[test]
    fn no_documents() {
        let outcome = merger(&[]).merge(Vec::new());
        assert!(outcome.report.has_errors());
    }
}
