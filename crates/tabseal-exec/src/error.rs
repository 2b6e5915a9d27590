use thiserror::Error;

use tabseal_core::error::Error;

/// Outcome of a scoped step body (`Run::record_step`).
#[derive(Debug, Error)]
pub enum StepError<E> {
    /// The body failed. The step was sealed as failed before this was returned.
    #[error("step body failed: {0}")]
    Body(E),

    #[error(transparent)]
    Recorder(#[from] Error),
}

impl<E> StepError<E> {
    pub fn is_body(&self) -> bool {
        matches!(self, StepError::Body(_))
    }

    pub fn into_body(self) -> Option<E> {
        match self {
            StepError::Body(e) => Some(e),
            StepError::Recorder(_) => None,
        }
    }
}
