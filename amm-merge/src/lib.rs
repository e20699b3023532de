//! Engine for merging Android manifest files.
//!
//! Documents are merged pairwise, a higher priority document absorbing a lower priority one.
//! Every decision the engine takes is described by the [`model::Registry`] (how each element type is
//! identified and how its attributes combine) and recorded in a [`report::MergeReport`] so that the
//! origin of each line of the final manifest can be explained.
//!
//! [`merger::ManifestMerger`] drives a whole merge: a main manifest, its overlays and its libraries.

pub mod attribute;
pub mod cleaner;
pub mod document;
pub mod error;
pub mod implicit;
pub mod instructions;
pub mod key;
pub mod merge;
pub mod merger;
pub mod model;
pub mod node;
pub mod options;
pub mod placeholder;
pub mod report;
pub mod sdk;
pub mod validation;

pub use document::{Document, DocumentType, SystemProperties};
pub use error::ErrorKind;
pub use merge::merge_documents;
pub use merger::{ManifestMerger, MergeOutcome};
pub use model::{Registry, UnknownElementPolicy};
pub use node::{Node, NodeId, SourcePosition};
pub use options::{MergeOptions, OutputKind};
pub use report::{Action, ActionType, MergeReport, Record, Severity};
