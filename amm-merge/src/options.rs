use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::UnknownElementPolicy;

/// What the merged manifest will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    /// The final manifest of an application. Tools instructions are removed.
    #[default]
    Application,
    /// The manifest of a library, which is merged again by its consumers. Tools instructions are kept.
    Library,
}

/// Settings of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeOptions {
    /// Add the permissions implied by libraries targeting older SDK versions.
    pub add_implicit_permissions: bool,
    pub disable_min_sdk_version_check: bool,
    pub output: OutputKind,
    pub unknown_elements: UnknownElementPolicy,
    /// Values of `${name}` placeholders.
    pub placeholders: BTreeMap<String, String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            add_implicit_permissions: true,
            disable_min_sdk_version_check: false,
            output: OutputKind::default(),
            unknown_elements: UnknownElementPolicy::default(),
            placeholders: BTreeMap::new(),
        }
    }
}

impl MergeOptions {
    /// Loads options from a JSON file. Missing fields take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("Reading config {path:?}"))?;
        Self::from_json(&text).with_context(|| format!("Parsing config {path:?}"))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
