//! Recorder configuration that downstream crates can serialize/deserialize.
//!
//! All structs are plain immutable values with `Default`. A `Recorder` refuses
//! to start with a config that fails `RecorderConfig::validate`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::HashAlgo;

/// Whether row-level diffing runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStrategy {
    None,
    #[default]
    Rowhash,
}

/// What a diff reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffMode {
    /// Added/removed/changed keys from per-row hash comparison.
    #[default]
    Rows,
    /// Schema diff only.
    Schema,
    /// Added/removed keys without comparing row hashes.
    KeysOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub mode: DiffStrategy,
    pub diff_mode: DiffMode,

    /// Columns identifying a row. Required for `rows`/`keys-only` diffs.
    pub primary_key: Vec<String>,

    /// Enables the fingerprint short-circuit and high-churn summarization.
    pub adaptive: bool,
    pub skip_if_fingerprint_match: bool,

    /// `(added+removed+changed)/|keys(in) ∪ keys(out)|` at or above this emits counts only.
    /// `0` disables summarization.
    pub summary_only_threshold: f64,

    /// Rows per hashing window and key-space bucket size; `0` disables chunking.
    pub chunk_rows: usize,

    /// Columns per hash group; `0` hashes all columns as one group.
    pub hash_group_size: usize,
    /// Workers used to hash groups; `0`/`1` hashes groups sequentially.
    pub parallel_groups: usize,

    /// Pick a group layout automatically for wide frames when none is configured.
    pub auto_parallel_wide: bool,
    pub auto_parallel_threshold_cols: usize,
    pub auto_hash_group_size: usize,
    pub auto_parallel_workers: usize,

    /// Memoize key → rowhash across adjacent steps of one run.
    pub cache_rowhash: bool,
    pub rowhash_cache_max_bytes: usize,

    /// Report every common key as changed when columns were added or removed.
    pub treat_schema_add_remove_as_change: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            mode: DiffStrategy::Rowhash,
            diff_mode: DiffMode::Rows,
            primary_key: Vec::new(),
            adaptive: true,
            skip_if_fingerprint_match: true,
            summary_only_threshold: 0.0,
            chunk_rows: 0,
            hash_group_size: 0,
            parallel_groups: 0,
            auto_parallel_wide: true,
            auto_parallel_threshold_cols: 40,
            auto_hash_group_size: 8,
            auto_parallel_workers: 4,
            cache_rowhash: true,
            rowhash_cache_max_bytes: 64 * 1024 * 1024, // 64 MiB
            treat_schema_add_remove_as_change: false,
        }
    }
}

impl DiffConfig {
    pub fn with_primary_key<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = cols.into_iter().map(Into::into).collect();
        self
    }

    /// True when this config produces a per-key diff (and therefore needs a key).
    pub fn needs_primary_key(&self) -> bool {
        self.mode == DiffStrategy::Rowhash && self.diff_mode != DiffMode::Schema
    }

    pub fn validate(&self) -> Result<()> {
        if !self.summary_only_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.summary_only_threshold)
        {
            return Err(Error::Config(format!(
                "summary_only_threshold must be within [0, 1], got {}",
                self.summary_only_threshold
            )));
        }
        if self.needs_primary_key() && self.primary_key.is_empty() {
            return Err(Error::Config(
                "rowhash diff requires an explicit primary_key".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for col in &self.primary_key {
            if col.is_empty() {
                return Err(Error::Config("primary_key contains an empty column name".into()));
            }
            if !seen.insert(col.as_str()) {
                return Err(Error::Config(format!("primary_key lists '{col}' twice")));
            }
        }
        if self.auto_parallel_wide
            && (self.auto_hash_group_size == 0 || self.auto_parallel_workers == 0)
        {
            return Err(Error::Config(
                "auto_parallel_wide needs auto_hash_group_size and auto_parallel_workers >= 1"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// Never store data artifacts.
    None,
    /// Store only if the estimated size fits `max_bytes`.
    #[default]
    Auto,
    /// Always store full artifacts (may be large).
    Always,
}

/// Compression applied to snapshot artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCodec {
    #[default]
    None,
    Zstd,
    Lz4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub mode: SnapshotMode,
    pub max_bytes: u64,
    /// When a full snapshot is skipped in `auto` mode, write a head sample instead.
    pub sample_on_skip: bool,
    pub sample_rows: usize,
    /// `0` keeps all columns in samples.
    pub sample_cols: usize,
    pub codec: SnapshotCodec,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            mode: SnapshotMode::Auto,
            max_bytes: 50 * 1024 * 1024, // 50 MiB
            sample_on_skip: true,
            sample_rows: 2000,
            sample_cols: 0,
            codec: SnapshotCodec::None,
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_on_skip && self.sample_rows == 0 {
            return Err(Error::Config("sample_rows must be >= 1 when sample_on_skip".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SealMode {
    None,
    #[default]
    Chain,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    pub mode: SealMode,
    pub algo: HashAlgo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Hand snapshot writes to background workers; `close_step` joins them.
    pub snapshot_async: bool,
    pub snapshot_async_workers: usize,
    /// A pending write not finished within this window fails the step.
    pub snapshot_timeout_ms: u64,
    /// Maximum total persisted bytes for a run; `None` disables the check.
    pub max_run_bytes: Option<u64>,
    /// Verify the chain at finish for runs tagged `env=prod|production`.
    pub require_verify_for_prod: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            snapshot_async: false,
            snapshot_async_workers: 2,
            snapshot_timeout_ms: 60_000,
            max_run_bytes: Some(1024 * 1024 * 1024), // 1 GiB
            require_verify_for_prod: true,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_async && self.snapshot_async_workers == 0 {
            return Err(Error::Config("snapshot_async_workers must be >= 1".into()));
        }
        if self.snapshot_timeout_ms == 0 {
            return Err(Error::Config("snapshot_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub diff: DiffConfig,
    pub snapshot: SnapshotConfig,
    pub seal: SealConfig,
    pub runtime: RuntimeConfig,
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<()> {
        self.diff.validate()?;
        self.snapshot.validate()?;
        self.runtime.validate()?;
        Ok(())
    }

    /// Parse a YAML document; missing sections fall back to defaults.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: RecorderConfig = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TABSEAL_PRIMARY_KEY`: comma-separated key columns
    /// - `TABSEAL_DIFF`: `none` | `rowhash`
    /// - `TABSEAL_DIFF_MODE`: `rows` | `schema` | `keys-only`
    /// - `TABSEAL_SUMMARY_ONLY_THRESHOLD`: churn ratio in `[0, 1]`
    /// - `TABSEAL_CHUNK_ROWS`, `TABSEAL_HASH_GROUP_SIZE`, `TABSEAL_PARALLEL_GROUPS`
    /// - `TABSEAL_CACHE_ROWHASH`: `true` | `false`
    /// - `TABSEAL_SNAPSHOT_MODE`: `none` | `auto` | `always`
    /// - `TABSEAL_SNAPSHOT_MAX_BYTES`, `TABSEAL_SNAPSHOT_CODEC`
    /// - `TABSEAL_SNAPSHOT_ASYNC`, `TABSEAL_SNAPSHOT_WORKERS`, `TABSEAL_SNAPSHOT_TIMEOUT_MS`
    /// - `TABSEAL_SEAL_MODE`: `none` | `chain`; `TABSEAL_SEAL_ALGO`: `blake3` | `sha256`
    ///
    /// Unparseable values are ignored; call `validate` before use.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TABSEAL_PRIMARY_KEY") {
            cfg.diff.primary_key = s
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }

        if let Some(v) = env_enum("TABSEAL_DIFF") {
            cfg.diff.mode = v;
        }

        if let Some(v) = env_enum("TABSEAL_DIFF_MODE") {
            cfg.diff.diff_mode = v;
        }

        if let Some(v) = env_parse::<f64>("TABSEAL_SUMMARY_ONLY_THRESHOLD") {
            cfg.diff.summary_only_threshold = v;
        }

        if let Some(v) = env_parse::<usize>("TABSEAL_CHUNK_ROWS") {
            cfg.diff.chunk_rows = v;
        }

        if let Some(v) = env_parse::<usize>("TABSEAL_HASH_GROUP_SIZE") {
            cfg.diff.hash_group_size = v;
        }

        if let Some(v) = env_parse::<usize>("TABSEAL_PARALLEL_GROUPS") {
            cfg.diff.parallel_groups = v;
        }

        if let Some(v) = env_parse::<bool>("TABSEAL_CACHE_ROWHASH") {
            cfg.diff.cache_rowhash = v;
        }

        if let Some(v) = env_enum("TABSEAL_SNAPSHOT_MODE") {
            cfg.snapshot.mode = v;
        }

        if let Some(v) = env_parse::<u64>("TABSEAL_SNAPSHOT_MAX_BYTES") {
            cfg.snapshot.max_bytes = v;
        }

        if let Some(v) = env_enum("TABSEAL_SNAPSHOT_CODEC") {
            cfg.snapshot.codec = v;
        }

        if let Some(v) = env_parse::<bool>("TABSEAL_SNAPSHOT_ASYNC") {
            cfg.runtime.snapshot_async = v;
        }

        if let Some(v) = env_parse::<usize>("TABSEAL_SNAPSHOT_WORKERS") {
            cfg.runtime.snapshot_async_workers = v;
        }

        if let Some(v) = env_parse::<u64>("TABSEAL_SNAPSHOT_TIMEOUT_MS") {
            cfg.runtime.snapshot_timeout_ms = v;
        }

        if let Some(v) = env_enum("TABSEAL_SEAL_MODE") {
            cfg.seal.mode = v;
        }

        if let Some(v) = env_enum("TABSEAL_SEAL_ALGO") {
            cfg.seal.algo = v;
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

// Enum values use their serde spelling (`keys-only`, `sha256`, ...).
fn env_enum<T: DeserializeOwned>(key: &str) -> Option<T> {
    let s = std::env::var(key).ok()?;
    serde_json::from_value(serde_json::Value::String(s.trim().to_string())).ok()
}

/// Where persisted runs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Fully-qualified URI (`file:///data/runs`, `memory://`); wins over `root`.
    pub uri: Option<String>,
    /// Local directory used when no URI is given.
    pub root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            root: ".tabseal".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn scheme(&self) -> Option<&str> {
        self.uri
            .as_deref()
            .and_then(|uri| uri.split_once("://").map(|(scheme, _)| scheme))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Local root directory, honoring a `file://` URI when present.
    pub fn local_root(&self) -> String {
        match (self.scheme(), self.uri.as_deref()) {
            (Some("file"), Some(uri)) => {
                file_uri_to_path(uri).unwrap_or_else(|| self.root.clone())
            }
            _ => self.root.clone(),
        }
    }

    /// - `TABSEAL_STORE_URI`: store URI
    /// - `TABSEAL_STORE_ROOT`: local root directory
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(s) = std::env::var("TABSEAL_STORE_URI") {
            cfg.uri = Some(s);
        }
        if let Ok(s) = std::env::var("TABSEAL_STORE_ROOT") {
            cfg.root = s;
        }
        cfg
    }
}

fn file_uri_to_path(uri: &str) -> Option<String> {
    let stripped = uri.strip_prefix("file://")?;
    if stripped.starts_with('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("/{}", stripped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requires_a_key_for_row_diffs() {
        let cfg = RecorderConfig::default();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut cfg = RecorderConfig::default();
        cfg.diff = cfg.diff.with_primary_key(["id"]);
        cfg.validate().unwrap();
    }

    #[test]
    fn schema_only_diff_needs_no_key() {
        let mut cfg = RecorderConfig::default();
        cfg.diff.diff_mode = DiffMode::Schema;
        cfg.validate().unwrap();
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut cfg = RecorderConfig::default();
        cfg.diff.primary_key = vec!["id".into()];
        cfg.diff.summary_only_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.diff.summary_only_threshold = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn yaml_overrides_are_partial() {
        let cfg = RecorderConfig::from_yaml_str(
            r#"
diff:
  primary_key: [id]
  diff_mode: keys-only
  chunk_rows: 10
seal:
  algo: sha256
"#,
        )
        .unwrap();
        assert_eq!(cfg.diff.diff_mode, DiffMode::KeysOnly);
        assert_eq!(cfg.diff.chunk_rows, 10);
        assert_eq!(cfg.seal.algo, HashAlgo::Sha256);
        assert_eq!(cfg.snapshot.mode, SnapshotMode::Auto);
    }

    #[test]
    fn store_config_file_uri() {
        let cfg = StoreConfig {
            uri: Some("file:///var/runs".into()),
            root: "ignored".into(),
        };
        assert_eq!(cfg.scheme(), Some("file"));
        assert_eq!(cfg.local_root(), "/var/runs");
    }
}
