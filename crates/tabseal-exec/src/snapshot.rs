//! Snapshot policy and the background writer pool.
//!
//! A snapshot is the dataset materialized as a `Table`, serialized as JSON and
//! wrapped in the store envelope (optionally compressed). Its `content_hash` is
//! BLAKE3 over the enveloped bytes, exactly as stored.
//!
//! In `auto` mode the size estimate is consulted before anything is
//! serialized; oversized datasets get a head sample (or nothing).

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use tabseal_core::config::{SnapshotConfig, SnapshotMode};
use tabseal_core::error::{Error, Result};
use tabseal_core::hash::hash_bytes;
use tabseal_core::types::{Dataset, Table};
use tabseal_store::envelope::{open_payload, seal_payload};
use tabseal_store::{Codec, Store};

use crate::payload::ArtifactRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Snapshots are turned off.
    None,
    Full,
    Sample,
    Skipped,
}

/// What was (or was not) persisted for one side of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub kind: SnapshotKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub rows: usize,
    pub cols: usize,
    pub codec: String,
}

impl SnapshotInfo {
    pub fn writes(&self) -> bool {
        matches!(self.kind, SnapshotKind::Full | SnapshotKind::Sample)
    }

    /// Artifact kind label for `side` (`input`/`output`).
    pub fn artifact_kind(&self, side: &str) -> String {
        match self.kind {
            SnapshotKind::Sample => format!("{side}_sample"),
            _ => format!("{side}_snapshot"),
        }
    }

    pub fn file_name(&self, side: &str) -> String {
        match self.kind {
            SnapshotKind::Sample => format!("{side}.sample.snap"),
            _ => format!("{side}.snap"),
        }
    }
}

/// Decide what to persist for `ds` from the size estimate alone.
pub fn plan(cfg: &SnapshotConfig, ds: &dyn Dataset, estimated_bytes: u64) -> SnapshotInfo {
    let codec = Codec::from(cfg.codec).label().to_string();
    let n_rows = ds.num_rows();
    let n_cols = ds.schema().len();
    let full = SnapshotInfo {
        kind: SnapshotKind::Full,
        reason: None,
        rows: n_rows,
        cols: n_cols,
        codec: codec.clone(),
    };
    match cfg.mode {
        SnapshotMode::None => SnapshotInfo {
            kind: SnapshotKind::None,
            reason: Some("snapshot_mode_none".into()),
            rows: 0,
            cols: 0,
            codec,
        },
        SnapshotMode::Always => full,
        SnapshotMode::Auto if estimated_bytes <= cfg.max_bytes => full,
        SnapshotMode::Auto if cfg.sample_on_skip => SnapshotInfo {
            kind: SnapshotKind::Sample,
            reason: Some("estimated_bytes_exceeds_max".into()),
            rows: cfg.sample_rows.min(n_rows),
            cols: if cfg.sample_cols == 0 {
                n_cols
            } else {
                cfg.sample_cols.min(n_cols)
            },
            codec,
        },
        SnapshotMode::Auto => SnapshotInfo {
            kind: SnapshotKind::Skipped,
            reason: Some("estimated_bytes_exceeds_max".into()),
            rows: 0,
            cols: 0,
            codec,
        },
    }
}

/// Serialize and store one snapshot. Blocking.
pub fn write_snapshot(
    store: &dyn Store,
    path: &str,
    kind: &str,
    ds: &dyn Dataset,
    info: &SnapshotInfo,
    codec: Codec,
) -> Result<ArtifactRef> {
    let table = match info.kind {
        SnapshotKind::Full => Table::head_of(ds, 0, 0),
        SnapshotKind::Sample => Table::head_of(ds, info.rows.max(1), info.cols),
        SnapshotKind::None | SnapshotKind::Skipped => {
            return Err(Error::Invariant(format!("no snapshot planned for {path}")))
        }
    };
    let json = serde_json::to_vec(&table)?;
    let bytes = seal_payload(codec, &json)?;
    store.put(path, &bytes)?;
    Ok(ArtifactRef {
        kind: kind.to_string(),
        content_hash: hash_bytes(&bytes),
        size: bytes.len() as u64,
        storage_path: path.to_string(),
    })
}

/// Load a snapshot artifact back into a `Table`.
pub fn read_snapshot(store: &dyn Store, path: &str) -> Result<Table> {
    let bytes = store.get(path)?;
    let json = open_payload(&bytes)?;
    Ok(serde_json::from_slice(&json)?)
}

/// A snapshot write that may still be in flight.
pub struct PendingWrite {
    path: String,
    state: PendingState,
}

enum PendingState {
    Ready(Result<ArtifactRef>),
    InFlight(mpsc::Receiver<Result<ArtifactRef>>),
}

impl PendingWrite {
    pub fn ready(path: impl Into<String>, result: Result<ArtifactRef>) -> Self {
        Self {
            path: path.into(),
            state: PendingState::Ready(result),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Block until the write lands or `deadline` passes.
    pub fn wait_until(self, deadline: Instant, timeout_ms: u64) -> Result<ArtifactRef> {
        match self.state {
            PendingState::Ready(r) => r,
            PendingState::InFlight(rx) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(r) => r,
                    Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Storage(format!(
                        "snapshot write {} timed out after {timeout_ms}ms",
                        self.path
                    ))),
                    Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Storage(format!(
                        "snapshot worker exited before finishing {}",
                        self.path
                    ))),
                }
            }
        }
    }
}

/// Join every pending write against one shared deadline.
///
/// All writes are waited on even after a failure, so nothing is left
/// unobserved; the first error wins.
pub fn join_all(pending: Vec<PendingWrite>, timeout_ms: u64) -> Result<Vec<ArtifactRef>> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut refs = Vec::with_capacity(pending.len());
    let mut first_err = None;
    for p in pending {
        match p.wait_until(deadline, timeout_ms) {
            Ok(r) => refs.push(r),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot write failed");
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(refs),
    }
}

struct Job {
    store: Arc<dyn Store>,
    path: String,
    kind: String,
    dataset: Arc<dyn Dataset>,
    info: SnapshotInfo,
    codec: Codec,
    reply: mpsc::Sender<Result<ArtifactRef>>,
}

/// Fixed-size pool of snapshot writer threads fed by a channel.
pub struct SnapshotWriter {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl SnapshotWriter {
    pub fn new(workers: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let handle = std::thread::Builder::new()
                .name(format!("tabseal-snapshot-{i}"))
                .spawn(move || worker_loop(rx))
                .map_err(|e| Error::Storage(format!("spawn snapshot worker: {e}")))?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            workers: handles,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(
        &self,
        store: Arc<dyn Store>,
        path: String,
        kind: String,
        dataset: Arc<dyn Dataset>,
        info: SnapshotInfo,
        codec: Codec,
    ) -> PendingWrite {
        let (reply, rx) = mpsc::channel();
        let job = Job {
            store,
            path: path.clone(),
            kind,
            dataset,
            info,
            codec,
            reply,
        };
        match self.tx.as_ref().map(|tx| tx.send(job)) {
            Some(Ok(())) => PendingWrite {
                path,
                state: PendingState::InFlight(rx),
            },
            _ => PendingWrite::ready(
                path,
                Err(Error::Storage("snapshot writer is shut down".into())),
            ),
        }
    }

    /// Stop accepting jobs and wait for queued writes to drain.
    pub fn shutdown(&mut self) {
        self.tx = None;
        for h in self.workers.drain(..) {
            if h.join().is_err() {
                tracing::error!("snapshot worker panicked");
            }
        }
    }

    /// Stop accepting jobs without waiting. Workers finish whatever they hold
    /// and exit on their own; their results go unobserved.
    pub fn detach(&mut self) {
        self.tx = None;
        self.workers.clear();
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        // Workers exit once the channel closes; queued jobs still complete.
        self.tx = None;
    }
}

fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let next = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => return,
        };
        let Ok(job) = next else { return };
        let res = write_snapshot(
            job.store.as_ref(),
            &job.path,
            &job.kind,
            job.dataset.as_ref(),
            &job.info,
            job.codec,
        );
        // The step may have timed out and dropped its receiver.
        let _ = job.reply.send(res);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabseal_core::schema::{DataType, Field, Schema};
    use tabseal_core::types::Scalar;
    use tabseal_store::MemoryStore;

    fn table(n: i64) -> Table {
        Table::from_rows(
            Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("name", DataType::Utf8, true),
            ]),
            (0..n)
                .map(|i| vec![Scalar::I64(i), Scalar::Str(format!("n{i}"))])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn auto_mode_samples_when_over_budget() {
        let t = table(100);
        let cfg = SnapshotConfig {
            max_bytes: 10,
            sample_rows: 5,
            ..SnapshotConfig::default()
        };
        let info = plan(&cfg, &t, t.estimated_bytes());
        assert_eq!(info.kind, SnapshotKind::Sample);
        assert_eq!(info.rows, 5);
        assert_eq!(info.cols, 2);

        let cfg = SnapshotConfig {
            max_bytes: 10,
            sample_on_skip: false,
            ..SnapshotConfig::default()
        };
        assert_eq!(plan(&cfg, &t, t.estimated_bytes()).kind, SnapshotKind::Skipped);

        let cfg = SnapshotConfig::default();
        assert_eq!(plan(&cfg, &t, t.estimated_bytes()).kind, SnapshotKind::Full);
    }

    #[test]
    fn written_snapshot_reads_back_and_hashes_stored_bytes() {
        let store = MemoryStore::new();
        let t = table(3);
        let info = plan(&SnapshotConfig::default(), &t, t.estimated_bytes());
        let r = write_snapshot(&store, "a/input.snap", "input_snapshot", &t, &info, Codec::None).unwrap();
        let stored = store.get("a/input.snap").unwrap();
        assert_eq!(r.content_hash, hash_bytes(&stored));
        assert_eq!(r.size, stored.len() as u64);
        let back = read_snapshot(&store, "a/input.snap").unwrap();
        assert_eq!(back.num_rows(), 3);
        assert_eq!(back.schema, t.schema);
    }

    #[test]
    fn pool_writes_and_joins() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut w = SnapshotWriter::new(2).unwrap();
        let t: Arc<dyn Dataset> = Arc::new(table(4));
        let info = plan(&SnapshotConfig::default(), t.as_ref(), t.estimated_bytes());
        let pending: Vec<PendingWrite> = (0..4)
            .map(|i| {
                w.submit(
                    Arc::clone(&store),
                    format!("p/{i}.snap"),
                    "output_snapshot".into(),
                    Arc::clone(&t),
                    info.clone(),
                    Codec::None,
                )
            })
            .collect();
        let refs = join_all(pending, 5_000).unwrap();
        assert_eq!(refs.len(), 4);
        w.shutdown();
        assert_eq!(store.list("p/").unwrap().len(), 4);
    }

    #[test]
    fn detached_pool_refuses_new_jobs() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut w = SnapshotWriter::new(1).unwrap();
        w.detach();
        assert_eq!(w.workers(), 0);
        let t: Arc<dyn Dataset> = Arc::new(table(1));
        let info = plan(&SnapshotConfig::default(), t.as_ref(), t.estimated_bytes());
        let p = w.submit(store, "d/0.snap".into(), "output_snapshot".into(), t, info, Codec::None);
        let err = join_all(vec![p], 1_000).unwrap_err();
        assert!(err.to_string().contains("shut down"));
    }
}
