//! Persisted documents: sealed payloads (`run_start`, `step`, `run_finish`)
//! and the mutable `run.json` index.
//!
//! Payloads are written as canonical compact JSON, byte-identical to what was
//! hashed into the chain. `run.json` is not sealed; it is a convenience index
//! that points at the chain head.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabseal_core::error::Error;
use tabseal_core::hash::{Hash256, HashAlgo};
use tabseal_core::id::Ordinal;
use tabseal_diff::{RowDiff, SchemaDiff};
use tabseal_seal::{RunIdentity, VerifyReport};

use crate::metrics::StepTimings;
use crate::snapshot::SnapshotInfo;

pub const PAYLOAD_FORMAT_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Open,
    Finished,
    Failed,
    /// Finished, but a prod run's own chain did not verify at finish.
    VerifyFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
}

/// A persisted artifact, addressed by content.
///
/// Deep verification re-hashes `storage_path` and compares it with `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: String,
    /// BLAKE3 of the exact stored bytes.
    pub content_hash: Hash256,
    pub size: u64,
    pub storage_path: String,
}

/// Recorded reason for a failed step or run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}

impl FailureInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn body(err: &dyn std::fmt::Display) -> Self {
        Self::new("body", err.to_string())
    }
}

impl From<&Error> for FailureInfo {
    fn from(e: &Error) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

/// `artifacts/input.json` / `artifacts/output.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub fingerprint: Hash256,
    pub schema_hash: Hash256,
    pub n_rows: usize,
    pub n_cols: usize,
    pub columns: Vec<String>,
    pub estimated_bytes: u64,
    pub snapshot: SnapshotInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    pub version: String,
    pub run_id: String,
    pub ordinal: Ordinal,
    pub name: String,
    pub status: StepStatus,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<Hash256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_fingerprint: Option<Hash256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_diff: Option<SchemaDiff>,
    /// Row-level summary (keys included unless summarized). The full diff
    /// object lives in the `diff` artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_diff: Option<RowDiff>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub timings: StepTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl StepPayload {
    pub fn artifact(&self, kind: &str) -> Option<&ArtifactRef> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStartPayload {
    pub version: String,
    pub identity: RunIdentity,
    pub created_at_ms: i64,
    pub tags: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, Value>,
    /// Effective recorder configuration, for reproducing the run.
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_run_bytes: Option<u64>,
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerifyReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFinishPayload {
    pub version: String,
    pub run_id: String,
    pub status: RunStatus,
    pub finished_at_ms: i64,
    pub steps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

/// One line of the step index kept in `run.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepIndexEntry {
    pub ordinal: Ordinal,
    pub name: String,
    pub status: StepStatus,
    pub payload_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealInfo {
    pub mode: String,
    pub algo: HashAlgo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis: Option<Hash256>,
}

/// `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDoc {
    pub version: String,
    pub identity: RunIdentity,
    pub status: RunStatus,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<i64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub seal: SealInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_head: Option<Hash256>,
    #[serde(default)]
    pub steps: Vec<StepIndexEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyOutcome>,
}
