//! Convenient re-exports for downstream crates.

pub use crate::config::{
    DiffConfig, DiffMode, DiffStrategy, RecorderConfig, RuntimeConfig, SealConfig, SealMode,
    SnapshotCodec, SnapshotConfig, SnapshotMode, StoreConfig,
};
pub use crate::error::{Error, Result};
pub use crate::hash::{Hash256, HashAlgo};
pub use crate::id::{Ordinal, SequenceNo};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Column, Dataset, RowBatch, RowKey, Scalar, Table};
