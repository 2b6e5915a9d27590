//! Row hashing.
//!
//! Ungrouped (single-group) layouts hash the canonical encoding of the value
//! columns directly. Grouped layouts hash each column group separately and
//! combine: `H(partial_1 ‖ partial_2 ‖ … ‖ partial_n)`, in group order.
//! The parallel path computes partials for a window of rows on scoped worker
//! threads and writes them into slots indexed by group, so completion order
//! never leaks into the result.

use std::ops::Range;

use tabseal_core::encode::encode_row;
use tabseal_core::hash::{hash_bytes, Hash256};
use tabseal_core::types::Scalar;

use crate::layout::HashLayout;

/// Canonical bytes of a row's value columns plus the byte range of each group.
#[derive(Debug, Default)]
pub struct EncodedRow {
    pub bytes: Vec<u8>,
    pub bounds: Vec<Range<usize>>,
}

impl EncodedRow {
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.bounds.clear();
    }

    pub fn hash(&self) -> Hash256 {
        if self.bounds.len() <= 1 {
            return hash_bytes(&self.bytes);
        }
        let mut h = blake3::Hasher::new();
        for r in &self.bounds {
            h.update(hash_bytes(&self.bytes[r.clone()]).as_bytes());
        }
        Hash256(h.finalize().into())
    }
}

/// Encode `row` under `layout` into `out`, reusing its buffers.
pub fn encode_into(layout: &HashLayout, row: &[Scalar], out: &mut EncodedRow) {
    out.clear();
    for group in layout.groups() {
        let start = out.bytes.len();
        encode_row(row, group, &mut out.bytes);
        out.bounds.push(start..out.bytes.len());
    }
}

/// Hash one row under `layout`.
pub fn row_hash(layout: &HashLayout, row: &[Scalar]) -> Hash256 {
    let mut enc = EncodedRow::default();
    encode_into(layout, row, &mut enc);
    enc.hash()
}

/// Hash a window of rows, spreading column groups across workers when the
/// layout is parallel. Output is aligned with `rows`.
pub fn hash_rows(layout: &HashLayout, rows: &[Vec<Scalar>]) -> Vec<Hash256> {
    if layout.is_parallel() && rows.len() > 1 {
        hash_rows_parallel(layout, rows)
    } else {
        let mut enc = EncodedRow::default();
        rows.iter()
            .map(|r| {
                encode_into(layout, r, &mut enc);
                enc.hash()
            })
            .collect()
    }
}

fn hash_rows_parallel(layout: &HashLayout, rows: &[Vec<Scalar>]) -> Vec<Hash256> {
    let groups = layout.groups();
    let workers = layout.workers().min(groups.len()).max(1);

    // partials[g][r] = hash of group g for row r.
    let mut partials: Vec<Vec<Hash256>> = vec![Vec::new(); groups.len()];

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for w in 0..workers {
            let groups = &groups;
            handles.push(scope.spawn(move || {
                let mut out: Vec<(usize, Vec<Hash256>)> = Vec::new();
                let mut buf = Vec::new();
                for g in (w..groups.len()).step_by(workers) {
                    let hashes = rows
                        .iter()
                        .map(|row| {
                            buf.clear();
                            encode_row(row, groups[g], &mut buf);
                            hash_bytes(&buf)
                        })
                        .collect();
                    out.push((g, hashes));
                }
                out
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(done) => {
                    for (g, hashes) in done {
                        partials[g] = hashes;
                    }
                }
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
    });

    (0..rows.len())
        .map(|r| {
            let mut h = blake3::Hasher::new();
            for group in &partials {
                h.update(group[r].as_bytes());
            }
            Hash256(h.finalize().into())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::HashOptions;
    use tabseal_core::schema::{DataType, Field, Schema};

    fn schema(n: usize) -> Schema {
        let mut fields = vec![Field::new("id", DataType::Int64, false)];
        for i in 0..n {
            fields.push(Field::new(format!("v{i:02}"), DataType::Int64, true));
        }
        Schema::new(fields)
    }

    fn rows(n_rows: i64, n_cols: usize) -> Vec<Vec<Scalar>> {
        (0..n_rows)
            .map(|r| {
                let mut row = vec![Scalar::I64(r)];
                row.extend((0..n_cols).map(|c| Scalar::I64(r * 100 + c as i64)));
                row
            })
            .collect()
    }

    #[test]
    fn column_reordering_does_not_change_hash() {
        let s = schema(3);
        let mut reversed = s.clone();
        reversed.fields.reverse();
        let opts = HashOptions::sequential();
        let a = HashLayout::new(&s, &["id".into()], None, &opts).unwrap();
        let b = HashLayout::new(&reversed, &["id".into()], None, &opts).unwrap();
        let row = vec![Scalar::I64(1), Scalar::I64(2), Scalar::Null, Scalar::I64(4)];
        let mut rev_row = row.clone();
        rev_row.reverse();
        assert_eq!(row_hash(&a, &row), row_hash(&b, &rev_row));
    }

    #[test]
    fn single_group_matches_ungrouped() {
        let s = schema(4);
        let plain = HashLayout::new(&s, &["id".into()], None, &HashOptions::sequential()).unwrap();
        let big = HashLayout::new(
            &s,
            &["id".into()],
            None,
            &HashOptions::sequential().with_groups(16, 4),
        )
        .unwrap();
        let data = rows(3, 4);
        assert_eq!(hash_rows(&plain, &data), hash_rows(&big, &data));
    }

    #[test]
    fn parallel_matches_sequential_for_grouped_layouts() {
        let s = schema(23);
        let data = rows(50, 23);
        let seq = HashLayout::new(&s, &["id".into()], None, &HashOptions::sequential().with_groups(5, 1))
            .unwrap();
        let expected = hash_rows(&seq, &data);
        for workers in [2, 3, 8] {
            let par = HashLayout::new(
                &s,
                &["id".into()],
                None,
                &HashOptions::sequential().with_groups(5, workers),
            )
            .unwrap();
            assert!(par.is_parallel());
            assert_eq!(hash_rows(&par, &data), expected, "workers={workers}");
        }
    }

    #[test]
    fn grouped_hash_combines_partials_in_group_order() {
        let s = schema(4);
        let l = HashLayout::new(&s, &["id".into()], None, &HashOptions::sequential().with_groups(2, 1))
            .unwrap();
        let row = rows(1, 4).remove(0);
        let mut enc = EncodedRow::default();
        encode_into(&l, &row, &mut enc);
        assert_eq!(enc.bounds.len(), 2);
        let p1 = hash_bytes(&enc.bytes[enc.bounds[0].clone()]);
        let p2 = hash_bytes(&enc.bytes[enc.bounds[1].clone()]);
        let mut cat = Vec::new();
        cat.extend_from_slice(p1.as_bytes());
        cat.extend_from_slice(p2.as_bytes());
        assert_eq!(row_hash(&l, &row), hash_bytes(&cat));
    }
}
