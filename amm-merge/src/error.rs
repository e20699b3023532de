use serde::Serialize;
use thiserror::Error;

/// The kinds of problem that make a merge fail.
///
/// These are collected into the [`crate::report::MergeReport`] rather than returned, so that one merge
/// surfaces every problem at once. `UnknownElementKind` is also returned directly by
/// [`crate::model::Registry::lookup`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ErrorKind {
    #[error("the main manifest does not declare a package")]
    MissingPackageDeclaration,
    #[error("an attribute has an invalid value")]
    InvalidAttributeValue,
    #[error("an attribute references an element that is not declared")]
    UnresolvedAttributeReference,
    #[error("incompatible SDK versions")]
    SdkVersionIncompatible,
    #[error("illegal tools instruction")]
    IllegalToolsInstruction,
    #[error("conflicting attribute values")]
    MergeConflict,
    #[error("a placeholder has no value")]
    UnresolvedPlaceholder,
    #[error("unknown element kind `{0}`")]
    UnknownElementKind(String),
}
