#![forbid(unsafe_code)]
//! tabseal-core: the shared vocabulary of the change recorder.
//!
//! - `schema`/`types`: scalar values, schemas, and the `Dataset` adapter that
//!   every engine-specific frame is normalized into before reaching us.
//! - `encode`: canonical row bytes (the only input ever fed to a row hash).
//! - `hash`: `Hash256` plus BLAKE3/SHA-256 helpers and canonical JSON hashing.
//! - `config`: immutable, validated recorder configuration.
//!
//! No threads and no storage I/O live here.

pub mod config;
pub mod encode;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod schema;
pub mod types;

/// Format version stamped into every persisted document.
pub const FORMAT_VERSION: &str = "1";

/// Crate version for provenance fields.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
