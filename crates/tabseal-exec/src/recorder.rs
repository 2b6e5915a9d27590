//! Entry point: validated configuration plus a store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use tabseal_core::config::{RecorderConfig, SnapshotMode, StoreConfig};
use tabseal_core::error::{Error, Result};
use tabseal_core::hash::Hash256;
use tabseal_seal::{RunIdentity, VerifyMode, VerifyReport};
use tabseal_store::{build_store_from_config, Codec, Store};

use crate::ids::generate_run_id;
use crate::report::{self, RunReport};
use crate::run::Run;
use crate::stream::StreamRun;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Generated (`run_<millis>_<hex>`) when absent.
    pub run_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, Value>,
}

impl RunOptions {
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.metadata.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }
}

/// Records runs for one `(project, dataset)` pair.
///
/// Cheap to clone; independent runs may be recorded concurrently from clones.
#[derive(Clone)]
pub struct Recorder {
    project: String,
    dataset: String,
    config: Arc<RecorderConfig>,
    store: Arc<dyn Store>,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("project", &self.project)
            .field("dataset", &self.dataset)
            .field("config", &self.config)
            .finish()
    }
}

impl Recorder {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        config: RecorderConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        let project = project.into();
        let dataset = dataset.into();
        if project.trim().is_empty() || dataset.trim().is_empty() {
            return Err(Error::Config("project and dataset must be non-empty".into()));
        }
        config.validate()?;
        let codec = Codec::from(config.snapshot.codec);
        if config.snapshot.mode != SnapshotMode::None && !codec.is_available() {
            return Err(Error::Config(format!(
                "snapshot codec '{}' is not compiled in (enable the `{}` feature)",
                codec.label(),
                codec.label()
            )));
        }
        Ok(Self {
            project,
            dataset,
            config: Arc::new(config),
            store,
        })
    }

    /// Build the store from `store_cfg` (`file://`, `memory://`, or a local root).
    pub fn with_store_config(
        project: impl Into<String>,
        dataset: impl Into<String>,
        config: RecorderConfig,
        store_cfg: &StoreConfig,
    ) -> Result<Self> {
        let store = build_store_from_config(store_cfg)?;
        Self::new(project, dataset, config, store)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn identity(&self, run_id: impl Into<String>) -> RunIdentity {
        RunIdentity::new(self.project.clone(), self.dataset.clone(), run_id)
    }

    /// Create a run and seal its `run_start` entry.
    pub fn start_run(&self, opts: RunOptions) -> Result<Run> {
        let run_id = match opts.run_id.as_deref() {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::Config("run_id must be non-empty".into()))
            }
            Some(id) => id.to_string(),
            None => generate_run_id(),
        };
        let identity = self.identity(run_id);
        Run::start(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            identity,
            opts,
        )
    }

    /// Start a run driven by micro-batches.
    pub fn start_stream(&self, opts: RunOptions) -> Result<StreamRun> {
        Ok(StreamRun::new(self.start_run(opts)?))
    }

    pub fn load_run_report(&self, run_id: &str) -> Result<RunReport> {
        report::load_run_report(self.store.as_ref(), &self.identity(run_id))
    }

    pub fn verify_run(
        &self,
        run_id: &str,
        mode: VerifyMode,
        expected_head: Option<&Hash256>,
    ) -> Result<VerifyReport> {
        report::verify_run(self.store.as_ref(), &self.identity(run_id), mode, expected_head)
    }
}
