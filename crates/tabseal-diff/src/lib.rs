#![forbid(unsafe_code)]
//! tabseal-diff: what changed between a step's input and output.
//!
//! The diff never touches raw rows itself; it consumes key → rowhash maps
//! produced by `tabseal-hash`. `diff_datasets` is the full pipeline
//! (short-circuit, shared-column rehash, bucketed diff, churn summary);
//! `schema_diff` and `diff_rowhashes*` are the pure building blocks.

pub mod engine;
pub mod rows;
pub mod schema;

pub use engine::{diff_datasets, diff_profiled, DiffNotes, DiffOptions, DiffReport};
pub use rows::{
    bucket_count, diff_rowhashes, diff_rowhashes_bucketed, DiffMarker, DiffSummary, RowDiff,
};
pub use schema::{schema_diff, DtypeChange, SchemaDiff};

/// Version stamped into persisted diff objects.
pub const DIFF_FORMAT_VERSION: &str = "1";
