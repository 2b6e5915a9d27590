//! Row diffs over key → rowhash maps.
//!
//! `added = keys(out) − keys(in)`, `removed = keys(in) − keys(out)`,
//! `changed = { k ∈ both : hash_in[k] ≠ hash_out[k] }`. Key lists are always
//! sorted so two diffs of the same inputs serialize identically.

use std::cmp::Ordering;
use std::iter::Peekable;

use serde::{Deserialize, Serialize};

use tabseal_core::config::DiffMode;
use tabseal_core::hash::{hash_str, Hash256};
use tabseal_core::types::RowKey;
use tabseal_hash::RowHashes;

/// Why a row diff carries no (or no enumerated) keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMarker {
    /// Fingerprints and schemas matched; the row diff was not computed.
    DiffSkippedFingerprintMatch,
    /// Churn reached the threshold; only counts are reported.
    SummaryOnlyHighChurn,
    /// `diff_mode = schema`; no row comparison was requested.
    DiffSchemaOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    /// `|keys(in) ∪ keys(out)|`.
    pub fn union(&self) -> usize {
        self.added + self.removed + self.changed + self.unchanged
    }

    /// `(added + removed + changed) / max(1, |keys(in) ∪ keys(out)|)`.
    pub fn churn(&self) -> f64 {
        (self.added + self.removed + self.changed) as f64 / self.union().max(1) as f64
    }

    fn merge(&mut self, other: &DiffSummary) {
        self.added += other.added;
        self.removed += other.removed;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDiff {
    pub mode: DiffMode,
    pub marker: Option<DiffMarker>,
    pub summary_only: bool,
    pub summary: DiffSummary,
    pub added: Vec<RowKey>,
    pub removed: Vec<RowKey>,
    pub changed: Vec<RowKey>,
}

impl RowDiff {
    fn empty(mode: DiffMode) -> Self {
        Self {
            mode,
            marker: None,
            summary_only: false,
            summary: DiffSummary::default(),
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// Identical content; every one of the `n_rows` keys is unchanged.
    pub fn fingerprint_match(mode: DiffMode, n_rows: usize) -> Self {
        let mut d = Self::empty(mode);
        d.marker = Some(DiffMarker::DiffSkippedFingerprintMatch);
        d.summary.unchanged = n_rows;
        d
    }

    pub fn schema_only() -> Self {
        let mut d = Self::empty(DiffMode::Schema);
        d.marker = Some(DiffMarker::DiffSchemaOnly);
        d
    }

    /// No key was added, removed, or changed.
    pub fn is_noop(&self) -> bool {
        self.summary.added == 0 && self.summary.removed == 0 && self.summary.changed == 0
    }

    /// Drop the key lists when churn reaches `threshold` (`0` disables).
    /// Returns whether the diff was summarized.
    pub fn apply_churn_threshold(&mut self, threshold: f64) -> bool {
        if threshold <= 0.0 || self.summary_only {
            return false;
        }
        let churn = self.summary.churn();
        if churn < threshold {
            return false;
        }
        tracing::debug!(churn, threshold, "high churn; emitting counts only");
        self.added.clear();
        self.removed.clear();
        self.changed.clear();
        self.summary_only = true;
        self.marker = Some(DiffMarker::SummaryOnlyHighChurn);
        true
    }

    /// Report every common key as changed (columns were added or removed).
    pub fn mark_all_common_changed(&mut self, a: &RowHashes, b: &RowHashes) {
        let common: Vec<RowKey> = a.keys().filter(|k| b.contains_key(*k)).cloned().collect();
        self.summary.changed = common.len();
        self.summary.unchanged = 0;
        self.changed = common;
    }
}

/// Merge-join two key-sorted sequences.
fn diff_sorted<'a, A, B>(a: A, b: B, mode: DiffMode) -> RowDiff
where
    A: Iterator<Item = (&'a RowKey, &'a Hash256)>,
    B: Iterator<Item = (&'a RowKey, &'a Hash256)>,
{
    let compare_hashes = mode != DiffMode::KeysOnly;
    let mut out = RowDiff::empty(mode);
    let mut a: Peekable<A> = a.peekable();
    let mut b: Peekable<B> = b.peekable();
    loop {
        let ord = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((ka, _)), Some((kb, _))) => ka.cmp(kb),
        };
        match ord {
            Ordering::Less => {
                if let Some((k, _)) = a.next() {
                    out.removed.push(k.clone());
                }
            }
            Ordering::Greater => {
                if let Some((k, _)) = b.next() {
                    out.added.push(k.clone());
                }
            }
            Ordering::Equal => {
                if let (Some((k, ha)), Some((_, hb))) = (a.next(), b.next()) {
                    if compare_hashes && ha != hb {
                        out.changed.push(k.clone());
                    } else {
                        out.summary.unchanged += 1;
                    }
                }
            }
        }
    }
    out.summary.added = out.added.len();
    out.summary.removed = out.removed.len();
    out.summary.changed = out.changed.len();
    out
}

/// Unbucketed row diff.
pub fn diff_rowhashes(a: &RowHashes, b: &RowHashes, mode: DiffMode) -> RowDiff {
    diff_sorted(a.iter(), b.iter(), mode)
}

/// `ceil(max(n_in, n_out) / chunk_rows)` buckets, at least one; `chunk_rows = 0` means one.
pub fn bucket_count(n_in: usize, n_out: usize, chunk_rows: usize) -> usize {
    if chunk_rows == 0 {
        1
    } else {
        n_in.max(n_out).div_ceil(chunk_rows).max(1)
    }
}

fn bucket_of(key: &RowKey, buckets: usize) -> usize {
    (hash_str(key.as_str()).prefix_u64() % buckets as u64) as usize
}

fn partition(map: &RowHashes, buckets: usize) -> Vec<Vec<(&RowKey, &Hash256)>> {
    let mut parts: Vec<Vec<(&RowKey, &Hash256)>> = vec![Vec::new(); buckets];
    for (k, h) in map {
        parts[bucket_of(k, buckets)].push((k, h));
    }
    parts
}

/// Partition the key space into `buckets` disjoint buckets by key hash, diff
/// each, and merge. Set-equal to `diff_rowhashes` for every bucket count.
pub fn diff_rowhashes_bucketed(
    a: &RowHashes,
    b: &RowHashes,
    mode: DiffMode,
    buckets: usize,
) -> RowDiff {
    if buckets <= 1 {
        return diff_rowhashes(a, b, mode);
    }
    let pa = partition(a, buckets);
    let pb = partition(b, buckets);

    let mut out = RowDiff::empty(mode);
    for (ba, bb) in pa.into_iter().zip(pb) {
        let part = diff_sorted(ba.into_iter(), bb.into_iter(), mode);
        out.summary.merge(&part.summary);
        out.added.extend(part.added);
        out.removed.extend(part.removed);
        out.changed.extend(part.changed);
    }
    out.added.sort();
    out.removed.sort();
    out.changed.sort();
    tracing::debug!(buckets, "bucketed row diff merged");
    out
}
