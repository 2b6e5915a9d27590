//! Read side: run reports and verification from a store alone.
//!
//! These shapes are versioned and are what server/CLI layers consume.

use serde::{Deserialize, Serialize};

use tabseal_core::error::{Error, Result};
use tabseal_core::hash::Hash256;
use tabseal_core::id::Ordinal;
use tabseal_diff::{DiffReport, RowDiff, SchemaDiff};
use tabseal_seal::{verify_chain, Chain, RunIdentity, RunPaths, VerifyMode, VerifyReport};
use tabseal_store::Store;

use crate::payload::{ArtifactRef, FailureInfo, RunDoc, StepPayload, StepStatus};

pub const REPORT_FORMAT_VERSION: &str = "1";

/// The full diff object when its artifact is readable, else the sealed summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StepDiff {
    Full(DiffReport),
    Summary(RowDiff),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub ordinal: Ordinal,
    pub name: String,
    pub status: StepStatus,
    pub input_fingerprint: Option<Hash256>,
    pub output_fingerprint: Option<Hash256>,
    pub schema_diff: Option<SchemaDiff>,
    pub diff: Option<StepDiff>,
    pub artifacts: Vec<ArtifactRef>,
    pub metadata: std::collections::BTreeMap<String, serde_json::Value>,
    pub error: Option<FailureInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub version: String,
    pub run: RunDoc,
    pub steps: Vec<StepReport>,
}

/// Load `run.json` and every step payload of a run, ordered by ordinal.
pub fn load_run_report(store: &dyn Store, identity: &RunIdentity) -> Result<RunReport> {
    let paths = RunPaths::new(identity);
    let run: RunDoc = serde_json::from_slice(&store.get(&paths.run_json())?)?;

    let mut steps = Vec::new();
    for key in store.list(&paths.steps_prefix())? {
        if !key.ends_with("/step.json") {
            continue;
        }
        let payload: StepPayload = serde_json::from_slice(&store.get(&key)?)?;
        steps.push(step_report(store, payload));
    }
    steps.sort_by_key(|s| s.ordinal);

    Ok(RunReport {
        version: REPORT_FORMAT_VERSION.to_string(),
        run,
        steps,
    })
}

fn step_report(store: &dyn Store, p: StepPayload) -> StepReport {
    let full = p
        .artifact("diff")
        .and_then(|a| store.get(&a.storage_path).ok())
        .and_then(|bytes| serde_json::from_slice::<DiffReport>(&bytes).ok());
    let diff = match (full, p.row_diff) {
        (Some(d), _) => Some(StepDiff::Full(d)),
        (None, Some(rows)) => Some(StepDiff::Summary(rows)),
        (None, None) => None,
    };
    StepReport {
        ordinal: p.ordinal,
        name: p.name,
        status: p.status,
        input_fingerprint: p.input_fingerprint,
        output_fingerprint: p.output_fingerprint,
        schema_diff: p.schema_diff,
        diff,
        artifacts: p.artifacts,
        metadata: p.metadata,
        error: p.error,
    }
}

/// Rebuild and check a run's chain from stored bytes.
///
/// A missing `chain.json` is an error (nothing to verify); a corrupt one, or
/// any mismatch, is a failed report.
pub fn verify_run(
    store: &dyn Store,
    identity: &RunIdentity,
    mode: VerifyMode,
    expected_head: Option<&Hash256>,
) -> Result<VerifyReport> {
    let paths = RunPaths::new(identity);
    let bytes = match store.get(&paths.chain_json()) {
        Ok(b) => b,
        Err(tabseal_store::Error::NotFound(_)) => {
            return Err(Error::Storage(format!(
                "run '{}' has no chain.json (missing or recorded without sealing)",
                identity.run_id
            )))
        }
        Err(e) => return Err(e.into()),
    };
    let chain = match Chain::from_bytes(&bytes) {
        Ok(c) => c,
        Err(e) => return Ok(VerifyReport::failed(format!("chain.json unreadable: {e}"), None)),
    };
    if chain.identity != *identity {
        return Ok(VerifyReport::failed(
            "chain.json belongs to a different run identity",
            None,
        ));
    }

    let mut report = verify_chain(&chain, store, mode, expected_head);
    if !report.ok {
        return Ok(report);
    }

    // run.json is an unsealed index, but its recorded head must agree.
    if let Ok(doc_bytes) = store.get(&paths.run_json()) {
        let recorded = serde_json::from_slice::<RunDoc>(&doc_bytes)
            .ok()
            .and_then(|doc| doc.chain_head);
        if let Some(head) = recorded {
            if head != chain.head {
                report.ok = false;
                report.detail = format!(
                    "run.json head {head} does not match chain head {}",
                    chain.head
                );
                report.first_bad_sequence = chain.last().map(|e| e.sequence_no.get());
            }
        }
    }
    Ok(report)
}
