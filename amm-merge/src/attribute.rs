//! Per-attribute rules: default values, validators and how two values are combined.

use amm_xml::Name;
use serde::Serialize;

use crate::sdk::SdkVersion;

/// How the value of an attribute declared by both documents is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergePolicy {
    /// The higher priority value wins, and the values must match unless the conflict is resolved with a tools instruction.
    #[default]
    Override,
    /// Boolean attributes: the result is `true` if either value is `true`.
    OrMerge,
    /// Numeric attributes: the larger value wins.
    NumericalSuperiority,
}

/// Why two attribute values could not be combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The values differ and the policy cannot pick one.
    Conflict,
    /// A value is not valid for the policy.
    InvalidValue(String),
}

impl MergePolicy {
    /// Combines the value of the higher priority document with that of the lower priority document.
    pub fn merge(&self, higher: &str, lower: &str) -> Result<String, PolicyError> {
        match self {
            Self::Override => {
                if higher == lower {
                    Ok(higher.to_string())
                } else {
                    Err(PolicyError::Conflict)
                }
            }
            Self::OrMerge => {
                let higher_value = parse_bool(higher).ok_or_else(|| PolicyError::InvalidValue(higher.to_string()))?;
                let lower_value = parse_bool(lower).ok_or_else(|| PolicyError::InvalidValue(lower.to_string()))?;
                Ok((higher_value || lower_value).to_string())
            }
            Self::NumericalSuperiority => {
                if higher == lower {
                    return Ok(higher.to_string());
                }
                let higher_level = SdkVersion::parse(higher)
                    .ok_or_else(|| PolicyError::InvalidValue(higher.to_string()))?
                    .api_level();
                let lower_level = SdkVersion::parse(lower)
                    .ok_or_else(|| PolicyError::InvalidValue(lower.to_string()))?
                    .api_level();
                // Keep the original literal of the winner, so that code names survive.
                Ok(if lower_level > higher_level { lower } else { higher }.to_string())
            }
        }
    }

    /// Whether a value missing from one document is merged as if it held the attribute's default.
    pub fn merges_default_values(&self) -> bool {
        *self != Self::Override
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "true" | "TRUE" | "True" => Some(true),
        "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// A check run against an attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    Boolean,
    Integer,
    /// An API level or a platform code name.
    SdkVersion,
    OneOf(Vec<String>),
    /// The value must be the key of an element of this type in the merged document.
    /// Only checked when validating the merged document.
    Reference(String),
}

impl Validator {
    pub fn one_of(values: &[&str]) -> Self {
        Self::OneOf(values.iter().map(|value| value.to_string()).collect())
    }

    /// Checks the literal form of the value.
    /// Returns a description of the expected values on failure.
    pub fn check_literal(&self, value: &str) -> Result<(), String> {
        // Resource references and placeholders are resolved later in the build.
        if value.starts_with('@') || value.starts_with('?') || value.contains("${") {
            return Ok(());
        }

        let valid = match self {
            Self::Boolean => parse_bool(value).is_some(),
            Self::Integer => parse_integer(value).is_some(),
            Self::SdkVersion => SdkVersion::parse(value).is_some(),
            Self::OneOf(allowed) => value.split('|').all(|part| allowed.iter().any(|a| a == part.trim())),
            Self::Reference(_) => true,
        };

        if valid {
            Ok(())
        } else {
            Err(self.expectation())
        }
    }

    fn expectation(&self) -> String {
        match self {
            Self::Boolean => "a boolean (true or false)".to_string(),
            Self::Integer => "an integer".to_string(),
            Self::SdkVersion => "an API level or a platform code name".to_string(),
            Self::OneOf(allowed) => format!("one of {}", allowed.join(", ")),
            Self::Reference(element_type) => format!("the name of a declared {element_type}"),
        }
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Rules for one attribute of an element type.
#[derive(Debug, Clone)]
pub struct AttributeModel {
    name: Name,
    default_value: Option<String>,
    on_read: Option<Validator>,
    on_write: Option<Validator>,
    merge_policy: MergePolicy,
    package_dependent: bool,
}

impl AttributeModel {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            default_value: None,
            on_read: None,
            on_write: None,
            merge_policy: MergePolicy::Override,
            package_dependent: false,
        }
    }

    /// The value may be a class name relative to the package of the declaring document.
    pub fn package_dependent(mut self) -> Self {
        self.package_dependent = true;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn on_read(mut self, validator: Validator) -> Self {
        self.on_read = Some(validator);
        self
    }

    pub fn on_write(mut self, validator: Validator) -> Self {
        self.on_write = Some(validator);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn default(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn read_validator(&self) -> Option<&Validator> {
        self.on_read.as_ref()
    }

    pub fn write_validator(&self) -> Option<&Validator> {
        self.on_write.as_ref()
    }

    pub fn policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn is_package_dependent(&self) -> bool {
        self.package_dependent
    }
}

/// Expands a class name relative to `package` into a fully qualified one.
/// `.Foo` and `Foo` become `package.Foo`, names which already contain a dot are left alone.
pub fn expand_class_name(package: &str, value: &str) -> String {
    if value.starts_with('.') {
        format!("{package}{value}")
    } else if value.is_empty() || value.contains('.') || value.contains("${") {
        value.to_string()
    } else {
        format!("{package}.{value}")
    }
}
