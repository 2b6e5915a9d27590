//! Dataset-level hashing: key → rowhash maps, schema hashes, fingerprints.
//!
//! Fingerprint layout (BLAKE3):
//!
//! ```text
//! "tabseal.fingerprint.v1" ‖ schema_hash ‖ for (key, rowhash) in key order:
//!     u64be(len(key)) ‖ key ‖ rowhash
//! ```
//!
//! With no primary key the fallback hashes the sorted multiset of full-row
//! hashes instead (`"tabseal.fingerprint.rows.v1"`, duplicates kept). Both are
//! independent of row order; the fallback cannot tell which row changed, only
//! that the multiset did.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use tabseal_core::error::{Error, Result};
use tabseal_core::hash::Hash256;
use tabseal_core::schema::Schema;
use tabseal_core::types::{Dataset, RowKey, Scalar};

use crate::cache::RowHashCache;
use crate::layout::{HashLayout, HashOptions};
use crate::row::{encode_into, hash_rows, EncodedRow};

/// Window used when no `chunk_rows` is configured. Window size never changes results.
pub const DEFAULT_WINDOW_ROWS: usize = 8192;

/// Duplicate keys reported in a `KeyCollision`.
pub const MAX_COLLISION_SAMPLE: usize = 10;

pub type RowHashes = BTreeMap<RowKey, Hash256>;

/// Hash of the sorted `(column, dtype)` pairs.
pub fn schema_hash(schema: &Schema) -> Hash256 {
    let mut h = blake3::Hasher::new();
    h.update(b"tabseal.schema.v1");
    for (name, dtype) in schema.sorted_pairs() {
        h.update(&(name.len() as u64).to_be_bytes());
        h.update(name.as_bytes());
        let label = dtype.name();
        h.update(&(label.len() as u64).to_be_bytes());
        h.update(label.as_bytes());
    }
    Hash256(h.finalize().into())
}

/// One rowhash per primary-key value, hashing every non-key column.
pub fn dataset_rowhashes(
    ds: &dyn Dataset,
    primary_key: &[String],
    opts: &HashOptions,
) -> Result<RowHashes> {
    if primary_key.is_empty() {
        return Err(Error::Config(
            "dataset_rowhashes requires a non-empty primary key".into(),
        ));
    }
    let layout = HashLayout::new(ds.schema(), primary_key, None, opts)?;
    rowhashes_with(ds, &layout, opts.chunk_rows, None)
}

/// Hash `ds` under a prepared layout, in windows of `chunk_rows` rows.
///
/// When a cache is supplied and the layout is sequential, rows whose bytes are
/// unchanged since the cache last saw their key reuse the cached hash.
pub fn rowhashes_with(
    ds: &dyn Dataset,
    layout: &HashLayout,
    chunk_rows: usize,
    mut cache: Option<&mut RowHashCache>,
) -> Result<RowHashes> {
    let window = if chunk_rows > 0 {
        chunk_rows
    } else {
        DEFAULT_WINDOW_ROWS
    };
    if let Some(c) = cache.as_deref_mut() {
        c.bind(layout.signature());
    }

    let mut out = RowHashes::new();
    let mut dupes: BTreeSet<String> = BTreeSet::new();
    let mut rows = ds.rows();
    let mut batch: Vec<Vec<Scalar>> = Vec::with_capacity(window.min(ds.num_rows()));
    let mut windows = 0usize;

    loop {
        batch.clear();
        batch.extend(rows.by_ref().take(window));
        if batch.is_empty() {
            break;
        }
        windows += 1;

        let keys = batch
            .iter()
            .map(|r| layout.key_of(r))
            .collect::<Result<Vec<_>>>()?;
        let hashes = match cache.as_deref_mut() {
            Some(c) if !layout.is_parallel() => hash_with_cache(layout, &batch, &keys, c),
            _ => hash_rows(layout, &batch),
        };

        for (k, h) in keys.into_iter().zip(hashes) {
            if out.contains_key(&k) {
                dupes.insert(k.0);
                if dupes.len() >= MAX_COLLISION_SAMPLE {
                    break;
                }
                continue;
            }
            out.insert(k, h);
        }
        if dupes.len() >= MAX_COLLISION_SAMPLE {
            break;
        }
    }

    if !dupes.is_empty() {
        return Err(Error::KeyCollision {
            side: "dataset".into(),
            sample: dupes.into_iter().collect(),
        });
    }
    tracing::debug!(
        rows = out.len(),
        windows,
        window,
        groups = layout.num_groups(),
        workers = layout.workers(),
        "rowhashes computed"
    );
    Ok(out)
}

fn hash_with_cache(
    layout: &HashLayout,
    rows: &[Vec<Scalar>],
    keys: &[RowKey],
    cache: &mut RowHashCache,
) -> Vec<Hash256> {
    let mut enc = EncodedRow::default();
    rows.iter()
        .zip(keys)
        .map(|(row, key)| {
            encode_into(layout, row, &mut enc);
            match cache.lookup(key, &enc.bytes) {
                Some(h) => h,
                None => {
                    let h = enc.hash();
                    cache.insert(key, &enc.bytes, h);
                    h
                }
            }
        })
        .collect()
}

/// Order-independent fingerprint over `(key, rowhash)` pairs and a schema hash.
pub fn fingerprint_from_rowhashes(schema_hash: &Hash256, rowhashes: &RowHashes) -> Hash256 {
    let mut h = blake3::Hasher::new();
    h.update(b"tabseal.fingerprint.v1");
    h.update(schema_hash.as_bytes());
    for (k, v) in rowhashes {
        h.update(&(k.0.len() as u64).to_be_bytes());
        h.update(k.0.as_bytes());
        h.update(v.as_bytes());
    }
    Hash256(h.finalize().into())
}

/// Keyless fallback: fingerprint of the sorted multiset of full-row hashes.
pub fn row_multiset_fingerprint(ds: &dyn Dataset, opts: &HashOptions) -> Result<Hash256> {
    let layout = HashLayout::new(ds.schema(), &[], None, opts)?;
    let mut hashes = all_row_hashes(ds, &layout, opts.chunk_rows);
    hashes.sort();
    let mut h = blake3::Hasher::new();
    h.update(b"tabseal.fingerprint.rows.v1");
    h.update(schema_hash(ds.schema()).as_bytes());
    h.update(&(hashes.len() as u64).to_be_bytes());
    for rh in &hashes {
        h.update(rh.as_bytes());
    }
    Ok(Hash256(h.finalize().into()))
}

fn all_row_hashes(ds: &dyn Dataset, layout: &HashLayout, chunk_rows: usize) -> Vec<Hash256> {
    let window = if chunk_rows > 0 {
        chunk_rows
    } else {
        DEFAULT_WINDOW_ROWS
    };
    let mut out = Vec::with_capacity(ds.num_rows());
    let mut rows = ds.rows();
    loop {
        let batch: Vec<Vec<Scalar>> = rows.by_ref().take(window).collect();
        if batch.is_empty() {
            break;
        }
        out.extend(hash_rows(layout, &batch));
    }
    out
}

/// Fingerprint of `ds`. An empty `primary_key` selects the row-multiset fallback.
pub fn fingerprint(ds: &dyn Dataset, primary_key: &[String], opts: &HashOptions) -> Result<Hash256> {
    if primary_key.is_empty() {
        return row_multiset_fingerprint(ds, opts);
    }
    let rowhashes = dataset_rowhashes(ds, primary_key, opts)?;
    Ok(fingerprint_from_rowhashes(&schema_hash(ds.schema()), &rowhashes))
}

/// Everything the recorder needs about one dataset, from a single hashing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDigest {
    pub schema_hash: Hash256,
    pub fingerprint: Hash256,
    pub n_rows: usize,
    pub n_cols: usize,
    pub hash_group_size: usize,
    pub hash_workers: usize,
    /// `None` for keyless datasets.
    #[serde(skip)]
    pub rowhashes: Option<RowHashes>,
}

/// Hash `ds` once, producing its fingerprint and (when keyed) its rowhashes.
pub fn profile(
    ds: &dyn Dataset,
    primary_key: &[String],
    opts: &HashOptions,
    cache: Option<&mut RowHashCache>,
) -> Result<DatasetDigest> {
    let schema = ds.schema();
    let s_hash = schema_hash(schema);
    let layout = HashLayout::new(schema, primary_key, None, opts)?;
    let (fingerprint, rowhashes, n_rows) = if primary_key.is_empty() {
        (row_multiset_fingerprint(ds, opts)?, None, ds.num_rows())
    } else {
        let rh = rowhashes_with(ds, &layout, opts.chunk_rows, cache)?;
        let n = rh.len();
        (fingerprint_from_rowhashes(&s_hash, &rh), Some(rh), n)
    };
    Ok(DatasetDigest {
        schema_hash: s_hash,
        fingerprint,
        n_rows,
        n_cols: schema.len(),
        hash_group_size: layout.group_size(),
        hash_workers: layout.workers(),
        rowhashes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabseal_core::schema::{DataType, Field};
    use tabseal_core::types::Table;

    fn table(rows: Vec<(i64, f64)>) -> Table {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("score", DataType::Float64, true),
        ]);
        Table::from_rows(
            schema,
            rows.into_iter()
                .map(|(i, s)| vec![Scalar::I64(i), Scalar::F64(s)])
                .collect(),
        )
        .unwrap()
    }

    fn pk() -> Vec<String> {
        vec!["id".to_string()]
    }

    #[test]
    fn fingerprint_ignores_row_order() {
        let a = table(vec![(1, 1.0), (2, 2.0), (3, 3.0)]);
        let b = table(vec![(3, 3.0), (1, 1.0), (2, 2.0)]);
        let opts = HashOptions::sequential();
        assert_eq!(
            fingerprint(&a, &pk(), &opts).unwrap(),
            fingerprint(&b, &pk(), &opts).unwrap()
        );
        assert_eq!(
            fingerprint(&a, &[], &opts).unwrap(),
            fingerprint(&b, &[], &opts).unwrap()
        );
    }

    #[test]
    fn fingerprint_sees_content_changes() {
        let a = table(vec![(1, 1.0), (2, 2.0)]);
        let b = table(vec![(1, 1.0), (2, 2.5)]);
        let opts = HashOptions::sequential();
        assert_ne!(
            fingerprint(&a, &pk(), &opts).unwrap(),
            fingerprint(&b, &pk(), &opts).unwrap()
        );
    }

    #[test]
    fn duplicate_keys_collide() {
        let a = table(vec![(1, 1.0), (1, 2.0), (2, 2.0)]);
        let err = dataset_rowhashes(&a, &pk(), &HashOptions::sequential()).unwrap_err();
        match err {
            Error::KeyCollision { sample, .. } => assert_eq!(sample, vec!["1".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn collisions_across_windows_are_caught() {
        let a = table(vec![(1, 1.0), (2, 2.0), (3, 3.0), (1, 4.0)]);
        let opts = HashOptions::sequential().with_chunk_rows(2);
        assert!(matches!(
            dataset_rowhashes(&a, &pk(), &opts),
            Err(Error::KeyCollision { .. })
        ));
    }

    #[test]
    fn chunking_does_not_change_rowhashes() {
        let a = table((0..25).map(|i| (i, i as f64 * 0.5)).collect());
        let base = dataset_rowhashes(&a, &pk(), &HashOptions::sequential()).unwrap();
        for chunk in [1, 7, 25, 100] {
            let opts = HashOptions::sequential().with_chunk_rows(chunk);
            assert_eq!(dataset_rowhashes(&a, &pk(), &opts).unwrap(), base);
        }
    }

    #[test]
    fn cache_hits_match_recomputation() {
        let a = table((0..10).map(|i| (i, i as f64)).collect());
        let b = table((0..10).map(|i| (i, if i < 5 { i as f64 } else { -1.0 })).collect());
        let opts = HashOptions::sequential();
        let layout = HashLayout::new(a.schema(), &pk(), None, &opts).unwrap();
        let mut cache = RowHashCache::new(1 << 20);

        let first = rowhashes_with(&a, &layout, 0, Some(&mut cache)).unwrap();
        assert_eq!(cache.hits(), 0);
        let second = rowhashes_with(&b, &layout, 0, Some(&mut cache)).unwrap();
        assert_eq!(cache.hits(), 5);
        assert_eq!(first, rowhashes_with(&a, &layout, 0, None).unwrap());
        assert_eq!(second, rowhashes_with(&b, &layout, 0, None).unwrap());
    }

    #[test]
    fn profile_reports_counts_and_layout() {
        let a = table(vec![(1, 1.0), (2, 2.0)]);
        let d = profile(&a, &pk(), &HashOptions::sequential(), None).unwrap();
        assert_eq!((d.n_rows, d.n_cols), (2, 2));
        assert_eq!(d.rowhashes.as_ref().map(|r| r.len()), Some(2));
        assert_eq!(d.fingerprint, fingerprint(&a, &pk(), &HashOptions::sequential()).unwrap());

        let keyless = profile(&a, &[], &HashOptions::sequential(), None).unwrap();
        assert!(keyless.rowhashes.is_none());
    }

    #[test]
    fn schema_hash_depends_on_dtype() {
        let a = Schema::new(vec![Field::new("x", DataType::Int64, false)]);
        let b = Schema::new(vec![Field::new("x", DataType::Float64, false)]);
        assert_ne!(schema_hash(&a), schema_hash(&b));
    }
}
