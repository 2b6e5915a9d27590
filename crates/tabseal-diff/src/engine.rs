//! The diff pipeline used at step close.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use tabseal_core::config::{DiffConfig, DiffMode, DiffStrategy};
use tabseal_core::error::{Error, Result};
use tabseal_core::hash::Hash256;
use tabseal_core::types::Dataset;
use tabseal_hash::dataset::rowhashes_with;
use tabseal_hash::{profile, DatasetDigest, HashLayout, HashOptions, RowHashCache, RowHashes};

use crate::rows::{bucket_count, diff_rowhashes_bucketed, RowDiff};
use crate::schema::{schema_diff, SchemaDiff};
use crate::DIFF_FORMAT_VERSION;

#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub strategy: DiffStrategy,
    pub diff_mode: DiffMode,
    pub primary_key: Vec<String>,
    pub adaptive: bool,
    pub skip_if_fingerprint_match: bool,
    pub summary_only_threshold: f64,
    pub treat_schema_add_remove_as_change: bool,
    pub hash: HashOptions,
}

impl From<&DiffConfig> for DiffOptions {
    fn from(cfg: &DiffConfig) -> Self {
        Self {
            strategy: cfg.mode,
            diff_mode: cfg.diff_mode,
            primary_key: cfg.primary_key.clone(),
            adaptive: cfg.adaptive,
            skip_if_fingerprint_match: cfg.skip_if_fingerprint_match,
            summary_only_threshold: cfg.summary_only_threshold,
            treat_schema_add_remove_as_change: cfg.treat_schema_add_remove_as_change,
            hash: HashOptions::from(cfg),
        }
    }
}

/// How a diff was computed; persisted alongside the keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffNotes {
    pub primary_key: Vec<String>,
    /// Non-key columns present on both sides; the only columns hashed for the diff.
    pub hashed_columns: Vec<String>,
    pub only_left_columns: Vec<String>,
    pub only_right_columns: Vec<String>,
    pub hash_group_size: usize,
    pub hash_workers: usize,
    pub chunk_rows: usize,
    pub buckets: usize,
    pub treat_schema_add_remove_as_change: bool,
}

/// The full diff object for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub version: String,
    pub input_fingerprint: Hash256,
    pub output_fingerprint: Hash256,
    pub schema_diff: SchemaDiff,
    /// Absent when row diffing is turned off (`mode = none`).
    pub rows: Option<RowDiff>,
    pub notes: DiffNotes,
}

/// Hash both datasets and diff them.
pub fn diff_datasets(
    input: &dyn Dataset,
    output: &dyn Dataset,
    opts: &DiffOptions,
) -> Result<DiffReport> {
    let din = profile(input, &opts.primary_key, &opts.hash, None).map_err(|e| e.on_side("input"))?;
    let dout =
        profile(output, &opts.primary_key, &opts.hash, None).map_err(|e| e.on_side("output"))?;
    diff_profiled(input, &din, output, &dout, opts)
}

/// Diff two datasets whose digests were already computed with `opts.primary_key`.
///
/// Digest rowhashes are reused when both sides have the same column names;
/// otherwise only the shared non-key columns are rehashed on each side.
pub fn diff_profiled(
    input: &dyn Dataset,
    din: &DatasetDigest,
    output: &dyn Dataset,
    dout: &DatasetDigest,
    opts: &DiffOptions,
) -> Result<DiffReport> {
    let sa = input.schema();
    let sb = output.schema();
    let sd = schema_diff(sa, sb);

    let mut notes = DiffNotes {
        primary_key: opts.primary_key.clone(),
        hashed_columns: Vec::new(),
        only_left_columns: sd.removed_columns.clone(),
        only_right_columns: sd.added_columns.clone(),
        hash_group_size: din.hash_group_size,
        hash_workers: din.hash_workers,
        chunk_rows: opts.hash.chunk_rows,
        buckets: 0,
        treat_schema_add_remove_as_change: opts.treat_schema_add_remove_as_change,
    };

    let rows = match (opts.strategy, opts.diff_mode) {
        (DiffStrategy::None, _) => None,
        (_, DiffMode::Schema) => Some(RowDiff::schema_only()),
        (DiffStrategy::Rowhash, mode) => {
            if opts.primary_key.is_empty() {
                return Err(Error::Config(
                    "rowhash diff requires an explicit primary_key".into(),
                ));
            }
            let mut shared: Vec<String> = sa
                .column_names()
                .into_iter()
                .filter(|c| sb.index_of(c).is_some() && !opts.primary_key.contains(c))
                .collect();
            shared.sort();
            notes.hashed_columns = shared.clone();

            if opts.adaptive
                && opts.skip_if_fingerprint_match
                && sd.is_empty()
                && din.fingerprint == dout.fingerprint
            {
                tracing::debug!(fingerprint = %din.fingerprint, "fingerprint match; row diff skipped");
                Some(RowDiff::fingerprint_match(mode, din.n_rows))
            } else {
                let (a, b) = shared_rowhashes(input, din, output, dout, &sd, &shared, opts)?;
                let layout = HashLayout::new(sa, &opts.primary_key, Some(&shared), &opts.hash)
                    .map_err(|e| e.on_side("input"))?;
                notes.hash_group_size = layout.group_size();
                notes.hash_workers = layout.workers();
                let buckets = bucket_count(a.len(), b.len(), opts.hash.chunk_rows);
                notes.buckets = buckets;
                let mut rd = diff_rowhashes_bucketed(&a, &b, mode, buckets);
                if opts.treat_schema_add_remove_as_change
                    && sd.has_add_remove()
                    && mode == DiffMode::Rows
                {
                    rd.mark_all_common_changed(&a, &b);
                }
                rd.apply_churn_threshold(opts.summary_only_threshold);
                Some(rd)
            }
        }
    };

    Ok(DiffReport {
        version: DIFF_FORMAT_VERSION.to_string(),
        input_fingerprint: din.fingerprint,
        output_fingerprint: dout.fingerprint,
        schema_diff: sd,
        rows,
        notes,
    })
}

fn shared_rowhashes<'a>(
    input: &dyn Dataset,
    din: &'a DatasetDigest,
    output: &dyn Dataset,
    dout: &'a DatasetDigest,
    sd: &SchemaDiff,
    shared: &[String],
    opts: &DiffOptions,
) -> Result<(Cow<'a, RowHashes>, Cow<'a, RowHashes>)> {
    if !sd.has_add_remove() {
        if let (Some(a), Some(b)) = (din.rowhashes.as_ref(), dout.rowhashes.as_ref()) {
            return Ok((Cow::Borrowed(a), Cow::Borrowed(b)));
        }
    }
    tracing::debug!(columns = shared.len(), "rehashing shared columns for diff");
    let rehash = |ds: &dyn Dataset, side: &str| -> Result<RowHashes> {
        let layout = HashLayout::new(ds.schema(), &opts.primary_key, Some(shared), &opts.hash)
            .map_err(|e| e.on_side(side))?;
        rowhashes_with(ds, &layout, opts.hash.chunk_rows, None::<&mut RowHashCache>)
            .map_err(|e| e.on_side(side))
    };
    Ok((
        Cow::Owned(rehash(input, "input")?),
        Cow::Owned(rehash(output, "output")?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::DiffMarker;
    use tabseal_core::schema::{DataType, Field, Schema};
    use tabseal_core::types::{RowKey, Scalar, Table};

    fn int_scores(rows: &[(i64, i64)]) -> Table {
        Table::from_rows(
            Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("score", DataType::Int64, true),
            ]),
            rows.iter()
                .map(|(i, s)| vec![Scalar::I64(*i), Scalar::I64(*s)])
                .collect(),
        )
        .unwrap()
    }

    fn opts() -> DiffOptions {
        let cfg = DiffConfig::default().with_primary_key(["id"]);
        DiffOptions::from(&cfg)
    }

    fn keys(ks: &[&str]) -> Vec<RowKey> {
        ks.iter().map(|k| RowKey::from(*k)).collect()
    }

    #[test]
    fn permuted_identical_content_short_circuits() {
        let a = int_scores(&[(1, 10), (2, 20), (3, 30)]);
        let b = int_scores(&[(3, 30), (1, 10), (2, 20)]);
        let r = diff_datasets(&a, &b, &opts()).unwrap();
        let rows = r.rows.unwrap();
        assert_eq!(rows.marker, Some(DiffMarker::DiffSkippedFingerprintMatch));
        assert!(rows.added.is_empty() && rows.removed.is_empty() && rows.changed.is_empty());
        assert_eq!(rows.summary.unchanged, 3);
    }

    #[test]
    fn add_and_drop_keys() {
        let a = int_scores(&[(1, 10), (2, 20), (3, 30)]);
        let b = int_scores(&[(2, 20), (3, 30), (4, 40)]);
        let rows = diff_datasets(&a, &b, &opts()).unwrap().rows.unwrap();
        assert_eq!(rows.added, keys(&["4"]));
        assert_eq!(rows.removed, keys(&["1"]));
        assert!(rows.changed.is_empty());
    }

    #[test]
    fn added_column_hashes_only_shared_columns() {
        let a = int_scores(&[(1, 10), (2, 20)]);
        let b = Table::from_rows(
            Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("score", DataType::Int64, true),
                Field::new("flag", DataType::Boolean, true),
            ]),
            vec![
                vec![Scalar::I64(1), Scalar::I64(10), Scalar::Bool(true)],
                vec![Scalar::I64(2), Scalar::I64(21), Scalar::Bool(false)],
            ],
        )
        .unwrap();
        let r = diff_datasets(&a, &b, &opts()).unwrap();
        assert_eq!(r.schema_diff.added_columns, vec!["flag".to_string()]);
        assert_eq!(r.notes.hashed_columns, vec!["score".to_string()]);
        assert_eq!(r.rows.as_ref().unwrap().changed, keys(&["2"]));

        let mut o = opts();
        o.treat_schema_add_remove_as_change = true;
        let r = diff_datasets(&a, &b, &o).unwrap();
        assert_eq!(r.rows.unwrap().changed, keys(&["1", "2"]));
    }

    #[test]
    fn schema_mode_emits_marker_only() {
        let a = int_scores(&[(1, 10)]);
        let b = int_scores(&[(2, 10)]);
        let mut o = opts();
        o.diff_mode = DiffMode::Schema;
        let rows = diff_datasets(&a, &b, &o).unwrap().rows.unwrap();
        assert_eq!(rows.marker, Some(DiffMarker::DiffSchemaOnly));
        assert!(rows.is_noop());
    }

    #[test]
    fn strategy_none_skips_rows() {
        let a = int_scores(&[(1, 10)]);
        let mut o = opts();
        o.strategy = DiffStrategy::None;
        assert!(diff_datasets(&a, &a, &o).unwrap().rows.is_none());
    }

    #[test]
    fn duplicate_output_key_names_side() {
        let a = int_scores(&[(1, 10)]);
        let b = int_scores(&[(1, 10), (1, 11)]);
        match diff_datasets(&a, &b, &opts()).unwrap_err() {
            Error::KeyCollision { side, .. } => assert_eq!(side, "output"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn notes_record_the_hash_layout() {
        let a = int_scores(&[(1, 10), (2, 20)]);
        let b = int_scores(&[(1, 10), (2, 21)]);
        let mut o = opts();
        o.hash = o.hash.with_groups(1, 2);
        let r = diff_datasets(&a, &b, &o).unwrap();
        assert_eq!(r.notes.hash_group_size, 1);
        assert_eq!(r.notes.hash_workers, 2);
        assert_eq!(r.rows.unwrap().changed, keys(&["2"]));
    }

    #[test]
    fn chunked_diff_matches_unchunked() {
        let a = int_scores(&(0..40).map(|i| (i, i)).collect::<Vec<_>>());
        let b = int_scores(&(5..45).map(|i| (i, if i % 4 == 0 { -i } else { i })).collect::<Vec<_>>());
        let base = diff_datasets(&a, &b, &opts()).unwrap().rows.unwrap();
        for chunk in [1, 10, 40] {
            let mut o = opts();
            o.hash.chunk_rows = chunk;
            let rows = diff_datasets(&a, &b, &o).unwrap().rows.unwrap();
            assert_eq!(rows.added, base.added);
            assert_eq!(rows.removed, base.removed);
            assert_eq!(rows.changed, base.changed);
        }
    }
}
