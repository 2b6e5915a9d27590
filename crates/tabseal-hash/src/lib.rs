#![forbid(unsafe_code)]
//! tabseal-hash: content hashes for rows and whole datasets.
//!
//! - `layout`: which columns are hashed, in which canonical order, and how they
//!   are split into column groups for wide frames.
//! - `row`: one row → one `Hash256`, sequentially or with groups spread over a
//!   bounded set of scoped worker threads. Both paths yield identical bytes.
//! - `dataset`: key → rowhash maps (optionally in row windows), schema hashes,
//!   order-independent fingerprints, and the single-pass `profile`.
//! - `cache`: the per-run rowhash memo.

pub mod cache;
pub mod dataset;
pub mod layout;
pub mod row;

pub use cache::RowHashCache;
pub use dataset::{
    dataset_rowhashes, fingerprint, fingerprint_from_rowhashes, profile, row_multiset_fingerprint,
    schema_hash, DatasetDigest, RowHashes,
};
pub use layout::{HashLayout, HashOptions};
pub use row::row_hash;
