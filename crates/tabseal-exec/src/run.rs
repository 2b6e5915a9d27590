//! The run/step state machine.
//!
//! ```text
//! open ──step──▶ pending ──close──▶ sealed(ok) ──▶ open ... ──finish──▶ finished
//!                   │
//!                   └──fail / error / drop──▶ sealed(failed) ──▶ failed
//! ```
//!
//! Every opened step consumes an ordinal and is sealed exactly once, so step
//! ordinals in the chain are gapless. Chain commits are atomic with respect to
//! the store: the payload is written first, then `chain.json`; if the latter
//! fails the in-memory chain is rolled back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tabseal_core::config::{RecorderConfig, SealMode};
use tabseal_core::error::{Error, Result};
use tabseal_core::hash::{canonical_json_bytes, hash_bytes, Hash256};
use tabseal_core::id::Ordinal;
use tabseal_core::types::Dataset;
use tabseal_diff::{diff_profiled, DiffOptions, DiffReport, RowDiff, SchemaDiff};
use tabseal_hash::{profile, DatasetDigest, RowHashCache};
use tabseal_seal::{verify_chain, Chain, EntryKind, RunIdentity, RunPaths, VerifyMode, VerifyReport};
use tabseal_store::{Codec, Store};

use crate::error::StepError;
use crate::events::{to_jsonl, RunEvent};
use crate::ids::now_ms;
use crate::metrics::{emit_timings, timed, StepTimings};
use crate::payload::{
    ArtifactRef, DatasetMeta, FailureInfo, RunDoc, RunFinishPayload, RunStartPayload, RunStatus,
    SealInfo, StepIndexEntry, StepPayload, StepStatus, PAYLOAD_FORMAT_VERSION,
};
use crate::policy;
use crate::recorder::RunOptions;
use crate::snapshot::{self, join_all, PendingWrite, SnapshotInfo, SnapshotKind, SnapshotWriter};

/// Returned by a successful `StepHandle::close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub ordinal: Ordinal,
    pub name: String,
    pub status: StepStatus,
    pub input_fingerprint: Option<Hash256>,
    pub output_fingerprint: Option<Hash256>,
    pub schema_diff: Option<SchemaDiff>,
    pub row_diff: Option<RowDiff>,
    /// `None` when sealing is disabled.
    pub entry_hash: Option<Hash256>,
}

/// Returned by `Run::finish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub identity: RunIdentity,
    pub status: RunStatus,
    pub steps: u64,
    pub chain_head: Option<Hash256>,
    pub total_bytes: u64,
    pub violations: Vec<String>,
}

/// One side (input or output) of an open step.
struct Side {
    dataset: Arc<dyn Dataset>,
    digest: DatasetDigest,
    estimated_bytes: u64,
    snapshot: SnapshotInfo,
}

struct OpenStep {
    ordinal: Ordinal,
    name: String,
    started_at_ms: i64,
    input: Option<Side>,
    output: Option<Side>,
    pending: Vec<PendingWrite>,
    metadata: BTreeMap<String, Value>,
    timings: StepTimings,
}

/// Everything computed at close, before sealing.
struct Computed {
    diff: Option<DiffReport>,
    artifacts: Vec<ArtifactRef>,
    timings: StepTimings,
}

/// An open run. Owns the chain head and the rowhash cache; single writer.
pub struct Run {
    config: Arc<RecorderConfig>,
    diff_opts: DiffOptions,
    store: Arc<dyn Store>,
    identity: RunIdentity,
    paths: RunPaths,
    doc: RunDoc,
    chain: Option<Chain>,
    next_ordinal: Ordinal,
    cache: Option<RowHashCache>,
    writer: Option<SnapshotWriter>,
    events: Vec<RunEvent>,
    last_output: Option<(Arc<dyn Dataset>, DatasetDigest)>,
    // No further chain entries may be written.
    closed: bool,
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("identity", &self.identity)
            .field("status", &self.doc.status)
            .field("next_ordinal", &self.next_ordinal)
            .field("chain_head", &self.doc.chain_head)
            .finish()
    }
}

impl Run {
    pub(crate) fn start(
        config: Arc<RecorderConfig>,
        store: Arc<dyn Store>,
        identity: RunIdentity,
        opts: RunOptions,
    ) -> Result<Self> {
        let span = tracing::info_span!("run_start", run_id = %identity.run_id);
        let _enter = span.enter();

        let paths = RunPaths::new(&identity);
        if store.exists(&paths.run_json())? {
            return Err(Error::State(format!(
                "run '{}' already exists under {}",
                identity.run_id,
                paths.prefix()
            )));
        }

        let created_at_ms = now_ms();
        let chain = match config.seal.mode {
            SealMode::Chain => Some(Chain::new(identity.clone(), config.seal.algo, created_at_ms)),
            SealMode::None => None,
        };
        let writer = if config.runtime.snapshot_async {
            Some(SnapshotWriter::new(config.runtime.snapshot_async_workers)?)
        } else {
            None
        };
        let cache = config
            .diff
            .cache_rowhash
            .then(|| RowHashCache::new(config.diff.rowhash_cache_max_bytes));

        let doc = RunDoc {
            version: PAYLOAD_FORMAT_VERSION.to_string(),
            identity: identity.clone(),
            status: RunStatus::Open,
            created_at_ms,
            finished_at_ms: None,
            tags: opts.tags.clone(),
            metadata: opts.metadata.clone(),
            seal: SealInfo {
                mode: match config.seal.mode {
                    SealMode::Chain => "chain".to_string(),
                    SealMode::None => "none".to_string(),
                },
                algo: config.seal.algo,
                genesis: chain.as_ref().map(|c| c.genesis),
            },
            chain_head: chain.as_ref().map(|c| c.head),
            steps: Vec::new(),
            policy: None,
        };

        let mut run = Run {
            diff_opts: DiffOptions::from(&config.diff),
            config,
            store,
            identity,
            paths,
            doc,
            chain,
            next_ordinal: Ordinal::new(1),
            cache,
            writer,
            events: Vec::new(),
            last_output: None,
            closed: true,
        };

        let payload = RunStartPayload {
            version: PAYLOAD_FORMAT_VERSION.to_string(),
            identity: run.identity.clone(),
            created_at_ms,
            tags: opts.tags,
            metadata: opts.metadata,
            config: serde_json::to_value(&*run.config)?,
        };
        let payload_ref = run.paths.run_start_json();
        run.commit(EntryKind::RunStart, None, payload_ref, &payload, created_at_ms)?;
        run.closed = false;
        run.write_run_doc()?;
        run.events.push(RunEvent::new(
            created_at_ms,
            "run_started",
            "",
            Value::Null,
        ));
        tracing::info!(
            project = %run.identity.project,
            dataset = %run.identity.dataset,
            sealed = run.chain.is_some(),
            "run started"
        );
        Ok(run)
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn run_id(&self) -> &str {
        &self.identity.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.doc.status
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn chain(&self) -> Option<&Chain> {
        self.chain.as_ref()
    }

    pub fn chain_head(&self) -> Option<Hash256> {
        self.chain.as_ref().map(|c| c.head)
    }

    /// Number of steps sealed so far (ok or failed).
    pub fn steps_sealed(&self) -> usize {
        self.doc.steps.len()
    }

    pub fn rowhash_cache(&self) -> Option<&RowHashCache> {
        self.cache.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.doc.status {
            RunStatus::Open if !self.closed => Ok(()),
            status => Err(Error::State(format!(
                "run '{}' is {status:?}; no further steps may be recorded",
                self.identity.run_id
            ))),
        }
    }

    /// Buffer an event; all events are written to `events.jsonl` at finish.
    pub fn add_event(
        &mut self,
        kind: impl Into<String>,
        message: impl Into<String>,
        data: Value,
    ) -> Result<()> {
        self.ensure_open()?;
        self.events
            .push(RunEvent::new(now_ms(), kind, message, data));
        Ok(())
    }

    /// Open the next step. `input` is `None` for source steps.
    ///
    /// Schema and key problems with `input` (missing or null key columns,
    /// duplicate keys) are reported before an ordinal is consumed.
    pub fn step(
        &mut self,
        name: &str,
        input: Option<Arc<dyn Dataset>>,
    ) -> Result<StepHandle<'_>> {
        self.ensure_open()?;
        if name.trim().is_empty() {
            return Err(Error::Config("step name must not be empty".into()));
        }
        let mut timings = StepTimings::default();
        let input = match input {
            Some(ds) => {
                self.check_dataset(ds.as_ref(), "input")?;
                let digest = timed(&mut timings.hash_ms, || self.digest(&ds, "input"))?;
                Some((ds, digest))
            }
            None => None,
        };

        let ordinal = self.next_ordinal;
        self.next_ordinal = ordinal.next();
        let started_at_ms = now_ms();

        let mut step = OpenStep {
            ordinal,
            name: name.to_string(),
            started_at_ms,
            input: None,
            output: None,
            pending: Vec::new(),
            metadata: BTreeMap::new(),
            timings,
        };
        if let Some((ds, digest)) = input {
            let (side, pending) = self.prepare_side(ordinal, name, "input", ds, digest);
            step.input = Some(side);
            step.pending.extend(pending);
        }
        self.events.push(
            RunEvent::new(started_at_ms, "step_started", name, Value::Null)
                .for_step(ordinal.get()),
        );
        tracing::debug!(ordinal = ordinal.get(), step = name, "step opened");
        Ok(StepHandle {
            run: self,
            step: Some(step),
        })
    }

    /// Open a step, run `body`, and seal the outcome.
    ///
    /// On `Ok` the step is closed normally; on `Err` it is sealed as failed and
    /// the body's error is returned as `StepError::Body`.
    pub fn record_step<T, E, F>(
        &mut self,
        name: &str,
        input: Option<Arc<dyn Dataset>>,
        body: F,
    ) -> std::result::Result<T, StepError<E>>
    where
        F: FnOnce(&mut StepHandle<'_>) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let mut step = self.step(name, input)?;
        match body(&mut step) {
            Ok(value) => {
                step.close()?;
                Ok(value)
            }
            Err(e) => {
                step.fail_with(FailureInfo::body(&e))?;
                Err(StepError::Body(e))
            }
        }
    }

    /// Verify what has been sealed so far.
    pub fn verify(&self, mode: VerifyMode) -> VerifyReport {
        match &self.chain {
            Some(chain) => verify_chain(chain, self.store.as_ref(), mode, None),
            None => VerifyReport::failed("run was recorded with seal mode 'none'", None),
        }
    }

    /// Evaluate run policy and seal `run_finish`.
    ///
    /// The status is `finished`, or `verify_failed` when a prod-tagged run's
    /// chain does not verify.
    pub fn finish(mut self) -> Result<RunSummary> {
        self.ensure_open()?;
        self.finish_inner(RunStatus::Finished, None)
    }

    fn check_dataset(&self, ds: &dyn Dataset, side: &str) -> Result<()> {
        let schema = ds.schema();
        schema
            .validate()
            .map_err(|e| Error::Schema(format!("{side}: {e}")))?;
        if self.config.diff.needs_primary_key() {
            schema
                .indices_of(&self.config.diff.primary_key)
                .map_err(|e| Error::Schema(format!("{side}: {e}")))?;
        }
        Ok(())
    }

    fn prepare_side(
        &self,
        ordinal: Ordinal,
        name: &str,
        side: &str,
        ds: Arc<dyn Dataset>,
        digest: DatasetDigest,
    ) -> (Side, Option<PendingWrite>) {
        let estimated_bytes = ds.estimated_bytes();
        let info = snapshot::plan(&self.config.snapshot, ds.as_ref(), estimated_bytes);
        if matches!(info.kind, SnapshotKind::Sample | SnapshotKind::Skipped) {
            tracing::warn!(
                ordinal = ordinal.get(),
                step = name,
                side,
                estimated_bytes,
                max_bytes = self.config.snapshot.max_bytes,
                kind = ?info.kind,
                "full snapshot skipped"
            );
        }
        let pending = info.writes().then(|| {
            let path = self.paths.artifact(ordinal, name, &info.file_name(side));
            let kind = info.artifact_kind(side);
            let codec = Codec::from(self.config.snapshot.codec);
            match &self.writer {
                Some(w) => w.submit(
                    Arc::clone(&self.store),
                    path,
                    kind,
                    Arc::clone(&ds),
                    info.clone(),
                    codec,
                ),
                None => {
                    let res = snapshot::write_snapshot(
                        self.store.as_ref(),
                        &path,
                        &kind,
                        ds.as_ref(),
                        &info,
                        codec,
                    );
                    PendingWrite::ready(path, res)
                }
            }
        });
        (
            Side {
                dataset: ds,
                digest,
                estimated_bytes,
                snapshot: info,
            },
            pending,
        )
    }

    /// Digest `ds`, reusing the previous step's output digest when `ds` is the same object.
    fn digest(&mut self, ds: &Arc<dyn Dataset>, side: &str) -> Result<DatasetDigest> {
        if let Some((prev, digest)) = &self.last_output {
            if Arc::as_ptr(prev) as *const () == Arc::as_ptr(ds) as *const () {
                return Ok(digest.clone());
            }
        }
        profile(
            ds.as_ref(),
            &self.diff_opts.primary_key,
            &self.diff_opts.hash,
            self.cache.as_mut(),
        )
        .map_err(|e| e.on_side(side))
    }

    fn compute(&mut self, step: &mut OpenStep) -> Result<Computed> {
        let mut timings = step.timings;
        let output = step
            .output
            .as_ref()
            .ok_or_else(|| Error::State(format!("step '{}' closed without an output", step.name)))?;

        let diff = match &step.input {
            Some(input) => Some(timed(&mut timings.diff_ms, || {
                diff_profiled(
                    input.dataset.as_ref(),
                    &input.digest,
                    output.dataset.as_ref(),
                    &output.digest,
                    &self.diff_opts,
                )
            })?),
            None => None,
        };

        let timeout_ms = self.config.runtime.snapshot_timeout_ms;
        let pending = std::mem::take(&mut step.pending);
        let mut artifacts = timed(&mut timings.write_wait_ms, || join_all(pending, timeout_ms))?;

        if let Some(side) = &step.input {
            let meta = dataset_meta(side);
            artifacts.push(self.put_json_artifact(step, "input_meta", "input.json", &meta)?);
        }
        if let Some(side) = &step.output {
            let meta = dataset_meta(side);
            artifacts.push(self.put_json_artifact(step, "output_meta", "output.json", &meta)?);
        }
        if let Some(d) = &diff {
            artifacts.push(self.put_json_artifact(step, "diff", "diff.json", d)?);
        }
        artifacts.sort_by(|a, b| a.kind.cmp(&b.kind));

        Ok(Computed {
            diff,
            artifacts,
            timings,
        })
    }

    fn put_json_artifact<T: Serialize>(
        &self,
        step: &OpenStep,
        kind: &str,
        file: &str,
        value: &T,
    ) -> Result<ArtifactRef> {
        let path = self.paths.artifact(step.ordinal, &step.name, file);
        let bytes = canonical_json_bytes(value)?;
        self.store.put(&path, &bytes)?;
        Ok(ArtifactRef {
            kind: kind.to_string(),
            content_hash: hash_bytes(&bytes),
            size: bytes.len() as u64,
            storage_path: path,
        })
    }

    fn close_step(&mut self, mut step: OpenStep) -> Result<StepSummary> {
        let span = tracing::info_span!(
            "close_step",
            run_id = %self.identity.run_id,
            ordinal = step.ordinal.get(),
            step = %step.name
        );
        let _enter = span.enter();

        let computed = match self.compute(&mut step) {
            Ok(c) => c,
            Err(e) => {
                self.seal_failed(step, FailureInfo::from(&e))?;
                return Err(e);
            }
        };
        match self.seal_ok(&step, computed) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                // Nothing was appended; record the failure in its place.
                if let Err(e2) = self.seal_failed(step, FailureInfo::from(&e)) {
                    tracing::error!(error = %e2, "could not seal failed step");
                }
                Err(e)
            }
        }
    }

    fn seal_ok(&mut self, step: &OpenStep, c: Computed) -> Result<StepSummary> {
        let finished_at_ms = now_ms();
        let payload = StepPayload {
            version: PAYLOAD_FORMAT_VERSION.to_string(),
            run_id: self.identity.run_id.clone(),
            ordinal: step.ordinal,
            name: step.name.clone(),
            status: StepStatus::Ok,
            started_at_ms: step.started_at_ms,
            finished_at_ms,
            input_fingerprint: step.input.as_ref().map(|s| s.digest.fingerprint),
            output_fingerprint: step.output.as_ref().map(|s| s.digest.fingerprint),
            schema_diff: c.diff.as_ref().map(|d| d.schema_diff.clone()),
            row_diff: c.diff.as_ref().and_then(|d| d.rows.clone()),
            artifacts: c.artifacts,
            metadata: step.metadata.clone(),
            timings: c.timings,
            error: None,
        };
        let payload_ref = self.paths.step_json(step.ordinal, &step.name);
        let entry_hash = self.commit(
            EntryKind::Step,
            Some(step.ordinal),
            payload_ref.clone(),
            &payload,
            finished_at_ms,
        )?;

        self.doc.steps.push(StepIndexEntry {
            ordinal: step.ordinal,
            name: step.name.clone(),
            status: StepStatus::Ok,
            payload_ref,
        });
        if let Err(e) = self.write_run_doc() {
            tracing::warn!(error = %e, "run.json not updated after step seal");
        }

        let rows = payload.row_diff.as_ref();
        self.events.push(
            RunEvent::new(
                finished_at_ms,
                "step_sealed",
                step.name.as_str(),
                json!({
                    "added": rows.map(|r| r.summary.added),
                    "removed": rows.map(|r| r.summary.removed),
                    "changed": rows.map(|r| r.summary.changed),
                    "marker": rows.and_then(|r| r.marker),
                }),
            )
            .for_step(step.ordinal.get()),
        );
        emit_timings(step.ordinal.get(), &step.name, &payload.timings);
        tracing::info!(
            ordinal = step.ordinal.get(),
            step = %step.name,
            added = rows.map(|r| r.summary.added).unwrap_or(0),
            removed = rows.map(|r| r.summary.removed).unwrap_or(0),
            changed = rows.map(|r| r.summary.changed).unwrap_or(0),
            hash_ms = payload.timings.hash_ms,
            "step sealed"
        );

        if let Some(out) = &step.output {
            self.last_output = Some((Arc::clone(&out.dataset), out.digest.clone()));
        }

        Ok(StepSummary {
            ordinal: step.ordinal,
            name: step.name.clone(),
            status: StepStatus::Ok,
            input_fingerprint: payload.input_fingerprint,
            output_fingerprint: payload.output_fingerprint,
            schema_diff: payload.schema_diff,
            row_diff: payload.row_diff,
            entry_hash,
        })
    }

    /// Seal `step` as failed, then seal `run_finish(failed)`.
    ///
    /// Pending snapshot writes are awaited but never referenced.
    fn seal_failed(&mut self, mut step: OpenStep, failure: FailureInfo) -> Result<()> {
        if !step.pending.is_empty() {
            if let Err(e) = join_all(
                std::mem::take(&mut step.pending),
                self.config.runtime.snapshot_timeout_ms,
            ) {
                tracing::debug!(error = %e, "discarding snapshot writes of failed step");
            }
        }

        let finished_at_ms = now_ms();
        let payload = StepPayload {
            version: PAYLOAD_FORMAT_VERSION.to_string(),
            run_id: self.identity.run_id.clone(),
            ordinal: step.ordinal,
            name: step.name.clone(),
            status: StepStatus::Failed,
            started_at_ms: step.started_at_ms,
            finished_at_ms,
            input_fingerprint: None,
            output_fingerprint: None,
            schema_diff: None,
            row_diff: None,
            artifacts: Vec::new(),
            metadata: step.metadata.clone(),
            timings: StepTimings::default(),
            error: Some(failure.clone()),
        };
        let payload_ref = self.paths.step_json(step.ordinal, &step.name);
        self.commit(
            EntryKind::Step,
            Some(step.ordinal),
            payload_ref.clone(),
            &payload,
            finished_at_ms,
        )?;
        self.doc.steps.push(StepIndexEntry {
            ordinal: step.ordinal,
            name: step.name.clone(),
            status: StepStatus::Failed,
            payload_ref,
        });
        self.events.push(
            RunEvent::new(
                finished_at_ms,
                "step_failed",
                failure.message.as_str(),
                json!({ "kind": failure.kind }),
            )
            .for_step(step.ordinal.get()),
        );
        tracing::warn!(
            ordinal = step.ordinal.get(),
            step = %step.name,
            kind = %failure.kind,
            error = %failure.message,
            "step failed"
        );

        self.finish_inner(RunStatus::Failed, Some(failure)).map(|_| ())
    }

    fn finish_inner(
        &mut self,
        status: RunStatus,
        failure: Option<FailureInfo>,
    ) -> Result<RunSummary> {
        let span = tracing::info_span!("run_finish", run_id = %self.identity.run_id, ?status);
        let _enter = span.enter();

        // A failed run may be failing because a write is stuck; never wait on it.
        if let Some(w) = self.writer.as_mut() {
            match status {
                RunStatus::Failed => w.detach(),
                _ => w.shutdown(),
            }
        }

        let outcome = policy::evaluate(
            &self.config.runtime,
            self.store.as_ref(),
            &self.paths.prefix(),
            &self.doc.tags,
            self.chain.as_ref(),
        )?;
        let status = match status {
            RunStatus::Finished
                if outcome
                    .violations
                    .iter()
                    .any(|v| v == policy::PROD_VERIFICATION_FAILED) =>
            {
                RunStatus::VerifyFailed
            }
            s => s,
        };

        let ts = now_ms();
        self.events.push(RunEvent::new(
            ts,
            "run_finished",
            "",
            json!({ "status": status }),
        ));
        let events_bytes = to_jsonl(&self.events)?;
        let events_path = self.paths.events_jsonl();
        self.store.put(&events_path, &events_bytes)?;
        let events_ref = ArtifactRef {
            kind: "events".to_string(),
            content_hash: hash_bytes(&events_bytes),
            size: events_bytes.len() as u64,
            storage_path: events_path,
        };

        let payload = RunFinishPayload {
            version: PAYLOAD_FORMAT_VERSION.to_string(),
            run_id: self.identity.run_id.clone(),
            status,
            finished_at_ms: ts,
            steps: self.doc.steps.len() as u64,
            events: Some(events_ref),
            policy: Some(outcome.clone()),
            failure,
        };
        let payload_ref = self.paths.run_finish_json();
        self.commit(EntryKind::RunFinish, None, payload_ref, &payload, ts)?;
        self.closed = true;

        self.doc.status = status;
        self.doc.finished_at_ms = Some(ts);
        self.doc.policy = Some(outcome.clone());
        self.write_run_doc()?;

        if !outcome.violations.is_empty() {
            tracing::warn!(violations = ?outcome.violations, "run finished with policy violations");
        }
        tracing::info!(steps = self.doc.steps.len(), head = ?self.doc.chain_head, "run finished");

        Ok(RunSummary {
            identity: self.identity.clone(),
            status,
            steps: self.doc.steps.len() as u64,
            chain_head: self.doc.chain_head,
            total_bytes: outcome.total_bytes,
            violations: outcome.violations,
        })
    }

    /// Persist `payload` at `payload_ref` and, when sealing, append its chain entry.
    ///
    /// The stored payload bytes are exactly the bytes that were hashed.
    fn commit<T: Serialize>(
        &mut self,
        kind: EntryKind,
        ordinal: Option<Ordinal>,
        payload_ref: String,
        payload: &T,
        ts: i64,
    ) -> Result<Option<Hash256>> {
        let Some(chain) = self.chain.as_mut() else {
            let bytes = canonical_json_bytes(payload)?;
            self.store.put(&payload_ref, &bytes)?;
            return Ok(None);
        };

        let (entry, bytes) = chain.prepare(kind, ordinal, &payload_ref, payload, ts)?;
        self.store.put(&payload_ref, &bytes)?;

        let prev_head = chain.head;
        chain.push(entry)?;
        let persisted = chain
            .to_bytes()
            .and_then(|b| Ok(self.store.put(&self.paths.chain_json(), &b)?));
        if let Err(e) = persisted {
            chain.entries.pop();
            chain.head = prev_head;
            return Err(e);
        }
        self.doc.chain_head = Some(chain.head);
        Ok(Some(chain.head))
    }

    fn write_run_doc(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.doc)?;
        self.store.put(&self.paths.run_json(), &bytes)?;
        Ok(())
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(run_id = %self.identity.run_id, "run dropped before finish; sealing as failed");
        let failure = FailureInfo::new("abandoned", "run dropped before finish");
        if let Err(e) = self.finish_inner(RunStatus::Failed, Some(failure)) {
            tracing::error!(error = %e, "could not seal abandoned run");
        }
    }
}

fn dataset_meta(side: &Side) -> DatasetMeta {
    let digest = &side.digest;
    DatasetMeta {
        fingerprint: digest.fingerprint,
        schema_hash: digest.schema_hash,
        n_rows: digest.n_rows,
        n_cols: digest.n_cols,
        columns: side.dataset.schema().column_names(),
        estimated_bytes: side.estimated_bytes,
        snapshot: side.snapshot.clone(),
    }
}

/// An open step. Sealed exactly once: by `close`, `fail`, or on drop (as failed).
pub struct StepHandle<'r> {
    run: &'r mut Run,
    step: Option<OpenStep>,
}

impl fmt::Debug for StepHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHandle")
            .field("run_id", &self.run.identity.run_id)
            .field("ordinal", &self.step.as_ref().map(|s| s.ordinal))
            .field("name", &self.step.as_ref().map(|s| s.name.as_str()))
            .finish()
    }
}

impl StepHandle<'_> {
    fn open(&mut self) -> Result<&mut OpenStep> {
        self.step
            .as_mut()
            .ok_or_else(|| Error::State("step is already sealed".into()))
    }

    pub fn ordinal(&self) -> Option<Ordinal> {
        self.step.as_ref().map(|s| s.ordinal)
    }

    pub fn name(&self) -> Option<&str> {
        self.step.as_ref().map(|s| s.name.as_str())
    }

    /// Supply the step's output and digest it.
    ///
    /// Schema and key problems are reported without sealing, leaving the
    /// handle open for a corrected output.
    pub fn set_output(&mut self, output: Arc<dyn Dataset>) -> Result<()> {
        let run = &mut *self.run;
        let step = self
            .step
            .as_mut()
            .ok_or_else(|| Error::State("step is already sealed".into()))?;
        if step.output.is_some() {
            return Err(Error::State(format!(
                "output already set for step '{}'",
                step.name
            )));
        }
        run.check_dataset(output.as_ref(), "output")?;
        let digest = timed(&mut step.timings.hash_ms, || run.digest(&output, "output"))?;
        let (side, pending) =
            run.prepare_side(step.ordinal, &step.name, "output", output, digest);
        step.output = Some(side);
        step.pending.extend(pending);
        Ok(())
    }

    /// Attach a metadata value; it is sealed with the step payload.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.open()?.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Compute diffs, join snapshot writes, and seal.
    ///
    /// Any error here seals the step as failed (and the run with it) before
    /// being returned.
    pub fn close(mut self) -> Result<StepSummary> {
        let step = self
            .step
            .take()
            .ok_or_else(|| Error::State("step is already sealed".into()))?;
        self.run.close_step(step)
    }

    /// Seal the step as failed with a caller-supplied reason.
    pub fn fail(self, message: impl Into<String>) -> Result<()> {
        self.fail_with(FailureInfo::new("body", message))
    }

    pub fn fail_with(mut self, failure: FailureInfo) -> Result<()> {
        let step = self
            .step
            .take()
            .ok_or_else(|| Error::State("step is already sealed".into()))?;
        self.run.seal_failed(step, failure)
    }
}

impl Drop for StepHandle<'_> {
    fn drop(&mut self) {
        let Some(step) = self.step.take() else {
            return;
        };
        let (kind, message) = if std::thread::panicking() {
            ("panic", "step body panicked")
        } else {
            ("abandoned", "step handle dropped before close")
        };
        tracing::warn!(ordinal = step.ordinal.get(), step = %step.name, kind, "sealing unclosed step as failed");
        if let Err(e) = self.run.seal_failed(step, FailureInfo::new(kind, message)) {
            tracing::error!(error = %e, "could not seal dropped step");
        }
    }
}
