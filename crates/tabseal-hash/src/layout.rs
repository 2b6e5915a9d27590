//! Hash layouts: the fixed column plan every row hash of a dataset follows.
//!
//! Value columns are hashed in canonical (name-sorted) order. Wide frames may
//! be split into contiguous groups of `group_size` columns; group boundaries
//! depend only on the column set and the configured group size, never on the
//! worker count, so a layout hashes identically however many workers run it.

use serde::{Deserialize, Serialize};

use tabseal_core::config::DiffConfig;
use tabseal_core::encode::canonical_order_of;
use tabseal_core::error::{Error, Result};
use tabseal_core::hash::Hash256;
use tabseal_core::schema::Schema;
use tabseal_core::types::{RowKey, Scalar};

/// Hashing knobs, lifted out of `DiffConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashOptions {
    /// Rows per hashing window; `0` picks `DEFAULT_WINDOW_ROWS`.
    pub chunk_rows: usize,
    pub hash_group_size: usize,
    pub parallel_groups: usize,
    pub auto_parallel_wide: bool,
    pub auto_parallel_threshold_cols: usize,
    pub auto_hash_group_size: usize,
    pub auto_parallel_workers: usize,
}

impl Default for HashOptions {
    fn default() -> Self {
        HashOptions::from(&DiffConfig::default())
    }
}

impl From<&DiffConfig> for HashOptions {
    fn from(cfg: &DiffConfig) -> Self {
        Self {
            chunk_rows: cfg.chunk_rows,
            hash_group_size: cfg.hash_group_size,
            parallel_groups: cfg.parallel_groups,
            auto_parallel_wide: cfg.auto_parallel_wide,
            auto_parallel_threshold_cols: cfg.auto_parallel_threshold_cols,
            auto_hash_group_size: cfg.auto_hash_group_size,
            auto_parallel_workers: cfg.auto_parallel_workers,
        }
    }
}

impl HashOptions {
    /// Sequential, ungrouped, unchunked hashing.
    pub fn sequential() -> Self {
        Self {
            chunk_rows: 0,
            hash_group_size: 0,
            parallel_groups: 0,
            auto_parallel_wide: false,
            auto_parallel_threshold_cols: 0,
            auto_hash_group_size: 0,
            auto_parallel_workers: 0,
        }
    }

    pub fn with_groups(mut self, group_size: usize, workers: usize) -> Self {
        self.hash_group_size = group_size;
        self.parallel_groups = workers;
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HashLayout {
    key_columns: Vec<String>,
    key_indices: Vec<usize>,
    value_columns: Vec<String>,
    value_indices: Vec<usize>,
    group_size: usize,
    workers: usize,
    auto: bool,
    signature: Hash256,
}

impl HashLayout {
    /// Plan hashing for `schema`.
    ///
    /// `primary_key` columns identify rows and are excluded from the row hash.
    /// `value_columns` restricts hashing to a column subset (the columns shared
    /// by both sides of a diff); `None` hashes every non-key column.
    pub fn new(
        schema: &Schema,
        primary_key: &[String],
        value_columns: Option<&[String]>,
        opts: &HashOptions,
    ) -> Result<Self> {
        schema.validate()?;
        let key_indices = schema.indices_of(primary_key)?;

        let candidates: Vec<String> = match value_columns {
            Some(cols) => {
                schema.indices_of(cols)?;
                cols.to_vec()
            }
            None => schema.column_names(),
        };
        let candidates: Vec<String> = candidates
            .into_iter()
            .filter(|c| !primary_key.contains(c))
            .collect();
        let value_indices = canonical_order_of(schema, &candidates);
        let value_columns: Vec<String> = value_indices
            .iter()
            .map(|&i| schema.fields[i].name.clone())
            .collect();

        let explicit = opts.hash_group_size > 0 || opts.parallel_groups > 0;
        let (group_size, workers, auto) = if explicit {
            (opts.hash_group_size, opts.parallel_groups.max(1), false)
        } else if opts.auto_parallel_wide
            && opts.auto_parallel_threshold_cols > 0
            && value_indices.len() >= opts.auto_parallel_threshold_cols
        {
            (
                opts.auto_hash_group_size,
                opts.auto_parallel_workers.max(1),
                true,
            )
        } else {
            (0, 1, false)
        };

        if explicit && group_size == 0 && workers > 1 {
            tracing::debug!(
                workers,
                "parallel_groups set without hash_group_size; hashing as one group"
            );
        }

        let signature = layout_signature(schema, primary_key, &value_indices, group_size);

        let layout = Self {
            key_columns: primary_key.to_vec(),
            key_indices,
            value_columns,
            value_indices,
            group_size,
            workers,
            auto,
            signature,
        };
        tracing::debug!(
            columns = layout.value_indices.len(),
            groups = layout.num_groups(),
            group_size = layout.group_size,
            workers = layout.workers,
            auto = layout.auto,
            "hash layout"
        );
        Ok(layout)
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn value_columns(&self) -> &[String] {
        &self.value_columns
    }

    pub fn value_indices(&self) -> &[usize] {
        &self.value_indices
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// True when the group layout was chosen by the wide-frame heuristic.
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// Identifies the column set, dtypes, and grouping; cache entries are only
    /// valid under the signature they were recorded with.
    pub fn signature(&self) -> Hash256 {
        self.signature
    }

    /// Column groups in canonical order. Always at least one group.
    pub fn groups(&self) -> Vec<&[usize]> {
        if self.group_size == 0 || self.value_indices.len() <= self.group_size {
            vec![self.value_indices.as_slice()]
        } else {
            self.value_indices.chunks(self.group_size).collect()
        }
    }

    pub fn num_groups(&self) -> usize {
        if self.group_size == 0 || self.value_indices.is_empty() {
            1
        } else {
            self.value_indices.len().div_ceil(self.group_size)
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.num_groups() > 1
    }

    pub fn is_parallel(&self) -> bool {
        self.workers > 1 && self.is_grouped()
    }

    /// The row's primary-key value.
    pub fn key_of(&self, row: &[Scalar]) -> Result<RowKey> {
        let parts = self
            .key_indices
            .iter()
            .map(|&i| row.get(i).unwrap_or(&Scalar::Null));
        RowKey::from_scalars(parts).map_err(|e| match e {
            Error::Schema(_) => Error::Schema(format!(
                "null value in primary key {:?}",
                self.key_columns
            )),
            other => other,
        })
    }
}

fn layout_signature(
    schema: &Schema,
    primary_key: &[String],
    value_indices: &[usize],
    group_size: usize,
) -> Hash256 {
    let mut h = blake3::Hasher::new();
    h.update(b"tabseal.layout.v1");
    for k in primary_key {
        h.update(&(k.len() as u64).to_be_bytes());
        h.update(k.as_bytes());
    }
    h.update(&[0xff]);
    for &i in value_indices {
        let f = &schema.fields[i];
        h.update(&(f.name.len() as u64).to_be_bytes());
        h.update(f.name.as_bytes());
        h.update(f.data_type.name().as_bytes());
        h.update(&[0x00]);
    }
    h.update(&(group_size as u64).to_be_bytes());
    Hash256(h.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabseal_core::schema::{DataType, Field};

    fn wide_schema(n: usize) -> Schema {
        let mut fields = vec![Field::new("id", DataType::Int64, false)];
        for i in 0..n {
            fields.push(Field::new(format!("c{i:03}"), DataType::Float64, true));
        }
        Schema::new(fields)
    }

    #[test]
    fn key_columns_are_not_hashed() {
        let s = wide_schema(3);
        let l = HashLayout::new(&s, &["id".into()], None, &HashOptions::sequential()).unwrap();
        assert_eq!(l.value_columns(), &["c000", "c001", "c002"]);
        assert_eq!(l.num_groups(), 1);
        assert!(!l.is_parallel());
    }

    #[test]
    fn missing_key_is_schema_error() {
        let s = wide_schema(1);
        let err = HashLayout::new(&s, &["nope".into()], None, &HashOptions::sequential())
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn auto_layout_kicks_in_for_wide_frames() {
        let opts = HashOptions::default();
        let narrow = HashLayout::new(&wide_schema(10), &["id".into()], None, &opts).unwrap();
        assert!(!narrow.is_auto());
        let wide = HashLayout::new(&wide_schema(50), &["id".into()], None, &opts).unwrap();
        assert!(wide.is_auto());
        assert_eq!(wide.group_size(), opts.auto_hash_group_size);
        assert_eq!(wide.num_groups(), 50usize.div_ceil(opts.auto_hash_group_size));
    }

    #[test]
    fn signature_ignores_worker_count() {
        let s = wide_schema(20);
        let a = HashLayout::new(&s, &["id".into()], None, &HashOptions::sequential().with_groups(4, 1))
            .unwrap();
        let b = HashLayout::new(&s, &["id".into()], None, &HashOptions::sequential().with_groups(4, 8))
            .unwrap();
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.groups(), b.groups());
    }

    #[test]
    fn value_subset_restricts_columns() {
        let s = wide_schema(4);
        let subset = vec!["c003".to_string(), "c001".to_string(), "id".to_string()];
        let l = HashLayout::new(&s, &["id".into()], Some(&subset), &HashOptions::sequential())
            .unwrap();
        assert_eq!(l.value_columns(), &["c001", "c003"]);
    }
}
