//! Micro-batch recording.
//!
//! Each pushed batch becomes one step whose input is the previous batch (the
//! first batch has no input). Steps carry `stream`, `batch_index` and, when
//! given, `window` metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use tabseal_core::error::Result;
use tabseal_core::types::Dataset;

use crate::run::{Run, RunSummary, StepSummary};

pub struct StreamRun {
    run: Run,
    batch_index: u64,
    last: Option<Arc<dyn Dataset>>,
}

impl fmt::Debug for StreamRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRun")
            .field("run", &self.run)
            .field("batch_index", &self.batch_index)
            .field("last_rows", &self.last.as_ref().map(|d| d.num_rows()))
            .finish()
    }
}

impl StreamRun {
    pub fn new(run: Run) -> Self {
        Self {
            run,
            batch_index: 0,
            last: None,
        }
    }

    /// Record one batch as a step.
    pub fn push(
        &mut self,
        name: &str,
        batch: Arc<dyn Dataset>,
        metadata: BTreeMap<String, Value>,
        window: Option<Value>,
    ) -> Result<StepSummary> {
        self.batch_index += 1;
        let input = self.last.clone();
        let mut step = self.run.step(name, input)?;
        step.add_metadata("stream", true)?;
        step.add_metadata("batch_index", self.batch_index)?;
        for (k, v) in metadata {
            step.add_metadata(k, v)?;
        }
        if let Some(w) = window {
            step.add_metadata("window", w)?;
        }
        step.set_output(Arc::clone(&batch))?;
        let summary = step.close()?;
        self.last = Some(batch);
        Ok(summary)
    }

    /// Batches pushed so far (including any that failed).
    pub fn batch_index(&self) -> u64 {
        self.batch_index
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn finish(self) -> Result<RunSummary> {
        self.run.finish()
    }
}
