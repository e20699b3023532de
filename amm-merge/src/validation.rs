//! Attribute value checks.
//!
//! Literal values are checked when a document is read. References to other elements can only be
//! checked once every document has been merged, using the key index of the merged document.

use crate::attribute::Validator;
use crate::document::Document;
use crate::error::ErrorKind;
use crate::model::Registry;
use crate::report::MergeReport;

/// Checks the literal value of every attribute with a read validator.
pub fn validate_on_read(document: &Document, registry: &Registry, report: &mut MergeReport) {
    document.root().visit(&mut |node| {
        let Some(model) = node.element_type.as_deref().and_then(|t| registry.get(t)) else {
            return;
        };

        for attr in &node.attributes {
            let Some(validator) = model
                .attribute_model(&attr.name)
                .and_then(|attr_model| attr_model.read_validator())
            else {
                continue;
            };

            if let Err(expected) = validator.check_literal(&attr.value) {
                report.error(
                    ErrorKind::InvalidAttributeValue,
                    format!(
                        "Attribute {}@{} at {} has an illegal value=({}), expected {}",
                        node.id(),
                        attr.name,
                        attr.origin,
                        attr.value,
                        expected
                    ),
                    Some(attr.origin.clone()),
                );
            }
        }
    });
}

/// Checks that attributes referencing other elements name an element present in the document.
pub fn validate_on_write(document: &Document, registry: &Registry, report: &mut MergeReport) {
    document.root().visit(&mut |node| {
        if node.instructions.operation.is_removal() {
            return;
        }
        let Some(model) = node.element_type.as_deref().and_then(|t| registry.get(t)) else {
            return;
        };

        for attr in &node.attributes {
            let Some(Validator::Reference(element_type)) = model
                .attribute_model(&attr.name)
                .and_then(|attr_model| attr_model.write_validator())
            else {
                continue;
            };

            if document.get_by_type_and_key(element_type, Some(attr.value.as_str())).is_none() {
                report.error(
                    ErrorKind::UnresolvedAttributeReference,
                    format!(
                        "Attribute {}@{} at {} references {} `{}` which is not declared",
                        node.id(),
                        attr.name,
                        attr.origin,
                        element_type,
                        attr.value
                    ),
                    Some(attr.origin.clone()),
                );
            }
        }
    });
}
