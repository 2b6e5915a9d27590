#![forbid(unsafe_code)]
//! tabseal-seal: the tamper-evident part.
//!
//! Every run-lifecycle event (run start, each step, run finish) is one
//! `ChainEntry`: `entry_hash = H(prev_hash ‖ payload_hash)`, where
//! `payload_hash = H(canonical JSON payload bytes)`. The first `prev_hash` is a
//! public genesis value derived from the run identity and creation time, so
//! any verifier can rebuild the chain from stored payloads without a secret.
//!
//! `paths` fixes the persisted layout; `verify` rebuilds a chain from a store.

pub mod chain;
pub mod paths;
pub mod verify;

pub use chain::{genesis_hash, seal, seal_bytes, Chain, ChainEntry, EntryKind, RunIdentity};
pub use paths::{safe_component, RunPaths};
pub use verify::{verify_chain, VerifyMode, VerifyReport};

/// Version stamped into `chain.json`.
pub const CHAIN_FORMAT_VERSION: &str = "1";
