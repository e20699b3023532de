//! Decoding of `uses-sdk` version values and the compatibility check run before a library is merged.

use log::debug;

use crate::document::{Document, DocumentType};
use crate::error::ErrorKind;
use crate::instructions::NodeOperation;
use crate::options::MergeOptions;
use crate::report::MergeReport;

/// Value used for `minSdkVersion` when a document does not declare one.
pub const DEFAULT_SDK_VERSION: &str = "1";

/// The highest API level with a released code name in [`PREVIEW_CODE_NAMES`].
pub const HIGHEST_KNOWN_API: u32 = 36;

const PREVIEW_CODE_NAMES: &[(&str, u32)] = &[
    ("L", 21),
    ("M", 23),
    ("N", 24),
    ("O", 26),
    ("P", 28),
    ("Q", 29),
    ("R", 30),
    ("S", 31),
    ("Sv2", 32),
    ("Tiramisu", 33),
    ("UpsideDownCake", 34),
    ("VanillaIceCream", 35),
    ("Baklava", 36),
];

/// A `minSdkVersion`, `targetSdkVersion` or `maxSdkVersion` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkVersion {
    ApiLevel(u32),
    /// A preview platform, identified by its code name (e.g. `Tiramisu`).
    CodeName(String),
}

impl SdkVersion {
    /// Parses an SDK version literal.
    /// Values starting with a digit must be plain integers. Anything else must look like a code name,
    /// an uppercase letter followed by letters and digits.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let first = value.chars().next()?;
        if first.is_ascii_digit() {
            value.parse().ok().map(Self::ApiLevel)
        } else if first.is_ascii_uppercase() && value.chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(Self::CodeName(value.to_string()))
        } else {
            None
        }
    }

    /// The API level to use for numeric comparisons.
    /// Code names not in the table are assumed to be the next, unreleased, platform.
    pub fn api_level(&self) -> u32 {
        match self {
            Self::ApiLevel(level) => *level,
            Self::CodeName(name) => PREVIEW_CODE_NAMES
                .iter()
                .find(|(code_name, _)| code_name == name)
                .map(|(_, level)| *level)
                .unwrap_or(HIGHEST_KNOWN_API + 1),
        }
    }

    pub fn is_code_name(&self) -> bool {
        matches!(self, Self::CodeName(_))
    }
}

/// API level of a version literal, falling back to the default level for values that do not parse.
/// Malformed values are reported by read validation.
pub(crate) fn api_level_of(value: &str) -> u32 {
    SdkVersion::parse(value).map(|version| version.api_level()).unwrap_or(1)
}

fn is_code_name(value: &str) -> bool {
    SdkVersion::parse(value).is_some_and(|version| version.is_code_name())
}

/// Outcome of [`check_compatibility`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SdkCheck {
    Passed,
    /// The higher priority document is an overlay without `uses-sdk`, so SDK handling is skipped entirely.
    Skipped,
    /// The lower priority document must not be merged.
    Failed,
}

/// Checks that `lower` can be imported into `higher` as far as SDK versions are concerned.
pub(crate) fn check_compatibility(
    higher: &Document,
    lower: &Document,
    options: &MergeOptions,
    report: &mut MergeReport,
) -> SdkCheck {
    let uses_sdk = higher.uses_sdk();
    if higher.doc_type() == DocumentType::Overlay && uses_sdk.is_none() {
        debug!("{} has no uses-sdk, skipping SDK checks", higher.source());
        return SdkCheck::Skipped;
    }

    if let Some(uses_sdk) = uses_sdk {
        if uses_sdk.instructions.operation != NodeOperation::Merge {
            report.error(
                ErrorKind::IllegalToolsInstruction,
                "uses-sdk element cannot have a \"tools:node\" attribute",
                Some(uses_sdk.origin.clone()),
            );
            return SdkCheck::Failed;
        }
    }

    let library_target = if lower.doc_type() == DocumentType::Library {
        lower.raw_target_sdk_version()
    } else {
        lower.target_sdk_version()
    };
    if is_code_name(&library_target) && library_target != higher.target_sdk_version() {
        report.error(
            ErrorKind::SdkVersionIncompatible,
            format!(
                "uses-sdk:targetSdkVersion {} cannot be different than version {} declared in library {}",
                higher.target_sdk_version(),
                library_target,
                lower.source()
            ),
            Some(lower.root().origin.clone()),
        );
        return SdkCheck::Failed;
    }

    let library_min = lower.explicit_min_sdk_version_or_default();
    if is_code_name(&library_min) && library_min != higher.min_sdk_version() {
        report.error(
            ErrorKind::SdkVersionIncompatible,
            format!(
                "uses-sdk:minSdkVersion {} cannot be different than version {} declared in library {}",
                higher.min_sdk_version(),
                library_min,
                lower.source()
            ),
            Some(lower.root().origin.clone()),
        );
        return SdkCheck::Failed;
    }

    if !options.disable_min_sdk_version_check && !min_sdk_compatible(higher, lower, &library_min) {
        let library_package = lower.package().unwrap_or("");
        report.error(
            ErrorKind::SdkVersionIncompatible,
            format!(
                "uses-sdk:minSdkVersion {} cannot be smaller than version {} declared in library {}\n\
                 \tSuggestion: use a compatible library with a minSdk of at most {}, \
                 or increase this project's minSdk version to at least {}, \
                 or use tools:overrideLibrary=\"{}\" to force usage (may lead to runtime failures)",
                higher.min_sdk_version(),
                library_min,
                lower.source(),
                higher.min_sdk_version(),
                library_min,
                library_package
            ),
            uses_sdk
                .map(|node| node.origin.clone())
                .or_else(|| Some(higher.root().origin.clone())),
        );
        return SdkCheck::Failed;
    }

    SdkCheck::Passed
}

fn min_sdk_compatible(higher: &Document, lower: &Document, library_min: &str) -> bool {
    if api_level_of(&higher.min_sdk_version()) >= api_level_of(library_min) {
        return true;
    }

    // The library may still be imported if it was explicitly allowed.
    higher.uses_sdk().is_some_and(|uses_sdk| {
        uses_sdk
            .instructions
            .override_libraries
            .iter()
            .any(|selector| selector.applies_to(lower))
    })
}
