//! The vocabulary of element types known to the merger and how each of them is merged.

use std::collections::HashMap;

use amm_xml::Name;
use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeModel, MergePolicy, Validator};
use crate::error::ErrorKind;
use crate::key::KeyResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeType {
    /// Attributes and children are merged.
    Merge,
    /// Only the children are merged, the attributes of the higher priority node are kept as is.
    MergeChildrenOnly,
}

/// What to do with elements that are not in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownElementPolicy {
    /// Loading a document with an unknown element fails.
    #[default]
    Reject,
    /// Unknown elements are kept without being merged with anything.
    PassThrough,
}

#[derive(Debug, Clone)]
pub struct ElementModel {
    name: String,
    merge_type: MergeType,
    key_resolver: KeyResolver,
    attributes: Vec<AttributeModel>,
}

impl ElementModel {
    pub fn new(name: &str, merge_type: MergeType, key_resolver: KeyResolver) -> Self {
        Self {
            name: name.to_string(),
            merge_type,
            key_resolver,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, model: AttributeModel) -> Self {
        self.attributes.push(model);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn merge_type(&self) -> MergeType {
        self.merge_type
    }

    pub fn key_resolver(&self) -> &KeyResolver {
        &self.key_resolver
    }

    pub fn attribute_model(&self, name: &Name) -> Option<&AttributeModel> {
        self.attributes.iter().find(|model| model.name() == name)
    }
}

/// The set of element types a merge understands.
///
/// A registry is built once and passed to every merge. It is never modified while merging.
#[derive(Debug, Clone)]
pub struct Registry {
    elements: HashMap<String, ElementModel>,
    unknown_elements: UnknownElementPolicy,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            unknown_elements: UnknownElementPolicy::default(),
        }
    }

    pub fn register(&mut self, model: ElementModel) {
        self.elements.insert(model.name.clone(), model);
    }

    pub fn with_unknown_elements(mut self, policy: UnknownElementPolicy) -> Self {
        self.unknown_elements = policy;
        self
    }

    pub fn unknown_elements(&self) -> UnknownElementPolicy {
        self.unknown_elements
    }

    pub fn lookup(&self, name: &str) -> Result<&ElementModel, ErrorKind> {
        self.elements
            .get(name)
            .ok_or_else(|| ErrorKind::UnknownElementKind(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ElementModel> {
        self.elements.get(name)
    }

    /// The element types of an Android manifest.
    pub fn android_manifest() -> Self {
        use KeyResolver as K;
        use MergeType::{Merge, MergeChildrenOnly};

        let mut registry = Self::new();
        let class_name = || AttributeModel::new(Name::android("name")).package_dependent();
        let required = || {
            AttributeModel::new(Name::android("required"))
                .default_value("true")
                .on_read(Validator::Boolean)
                .merge_policy(MergePolicy::OrMerge)
        };
        let sdk_version = |name: &str| {
            AttributeModel::new(Name::android(name))
                .on_read(Validator::SdkVersion)
                .merge_policy(MergePolicy::NumericalSuperiority)
        };

        registry.register(ElementModel::new("manifest", MergeChildrenOnly, K::NoKey));
        registry.register(ElementModel::new("action", Merge, K::name()));
        registry.register(ElementModel::new("category", Merge, K::name()));
        registry.register(
            ElementModel::new("activity", Merge, K::name())
                .with_attribute(class_name())
                .with_attribute(AttributeModel::new(Name::android("parentActivityName")).package_dependent()),
        );
        registry.register(
            ElementModel::new("activity-alias", Merge, K::name())
                .with_attribute(class_name())
                .with_attribute(AttributeModel::new(Name::android("targetActivity")).package_dependent()),
        );
        registry.register(
            ElementModel::new("application", Merge, K::NoKey)
                .with_attribute(class_name())
                .with_attribute(AttributeModel::new(Name::android("backupAgent")).package_dependent()),
        );
        registry.register(ElementModel::new("instrumentation", Merge, K::name()).with_attribute(class_name()));
        registry.register(ElementModel::new(
            "intent-filter",
            Merge,
            K::Children(vec!["action".to_string(), "category".to_string(), "data".to_string()]),
        ));
        registry.register(ElementModel::new(
            "data",
            Merge,
            K::attributes(&["scheme", "host", "port", "path", "pathPrefix", "pathPattern", "mimeType"]),
        ));
        registry.register(ElementModel::new("meta-data", Merge, K::name()));
        for component in ["provider", "receiver", "service"] {
            registry.register(ElementModel::new(component, Merge, K::name()).with_attribute(class_name()));
        }
        registry.register(
            ElementModel::new("permission", Merge, K::name())
                .with_attribute(
                    AttributeModel::new(Name::android("permissionGroup"))
                        .on_write(Validator::Reference("permission-group".to_string())),
                )
                .with_attribute(
                    AttributeModel::new(Name::android("protectionLevel"))
                        .default_value("normal")
                        .on_read(Validator::one_of(&["normal", "dangerous", "signature", "signatureOrSystem"])),
                ),
        );
        for permission_type in ["permission-group", "permission-tree"] {
            registry.register(
                ElementModel::new(permission_type, Merge, K::name())
                    .with_attribute(AttributeModel::new(Name::android("name"))),
            );
        }
        registry.register(ElementModel::new("supports-screens", Merge, K::NoKey));
        registry.register(ElementModel::new("uses-feature", Merge, K::name()).with_attribute(required()));
        registry.register(ElementModel::new("uses-library", Merge, K::name()).with_attribute(required()));
        for permission_type in ["uses-permission", "uses-permission-sdk-23"] {
            registry.register(
                ElementModel::new(permission_type, Merge, K::name())
                    .with_attribute(AttributeModel::new(Name::android("maxSdkVersion")).on_read(Validator::Integer)),
            );
        }
        registry.register(
            ElementModel::new("uses-sdk", Merge, K::NoKey)
                .with_attribute(sdk_version("minSdkVersion").default_value(crate::sdk::DEFAULT_SDK_VERSION))
                .with_attribute(sdk_version("targetSdkVersion"))
                .with_attribute(sdk_version("maxSdkVersion")),
        );
        registry.register(ElementModel::new("uses-configuration", Merge, K::NoKey));
        registry.register(ElementModel::new("supports-gl-texture", Merge, K::name()));
        registry.register(ElementModel::new("compatible-screens", Merge, K::NoKey));
        registry.register(ElementModel::new(
            "screen",
            Merge,
            K::attributes(&["screenSize", "screenDensity"]),
        ));
        registry.register(ElementModel::new(
            "grant-uri-permission",
            Merge,
            K::attributes(&["path", "pathPrefix", "pathPattern"]),
        ));
        registry.register(ElementModel::new(
            "path-permission",
            Merge,
            K::attributes(&["path", "pathPrefix", "pathPattern", "permission", "readPermission", "writePermission"]),
        ));
        registry.register(ElementModel::new("queries", Merge, K::NoKey));
        registry.register(ElementModel::new(
            "intent",
            Merge,
            K::Children(vec!["action".to_string(), "category".to_string(), "data".to_string()]),
        ));
        registry.register(ElementModel::new("property", Merge, K::name()));
        registry.register(ElementModel::new("profileable", Merge, K::NoKey));
        registry.register(ElementModel::new("uses-native-library", Merge, K::name()).with_attribute(required()));
        registry.register(ElementModel::new("package", Merge, K::name()));
        registry.register(ElementModel::new("original-package", Merge, K::name()));

        registry
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
