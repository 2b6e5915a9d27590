//! Chain verification.
//!
//! Shallow: walk the entries from the public genesis, re-hash each stored
//! payload exactly as persisted, recompute every `entry_hash`, and compare the
//! final head with the recorded one (and an externally anchored head, if
//! given). Deep: additionally re-hash every artifact a payload references
//! (any object carrying `content_hash` + `storage_path`).
//!
//! Findings are returned in the report; nothing here fails on tampering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabseal_core::hash::{hash_bytes, Hash256};
use tabseal_store::Store;

use crate::chain::{entry_hash, genesis_hash, Chain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    #[default]
    Shallow,
    Deep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub ok: bool,
    pub detail: String,
    /// First entry whose recomputation diverged.
    pub first_bad_sequence: Option<u64>,
    pub entries_checked: usize,
    pub artifacts_checked: usize,
}

impl VerifyReport {
    pub fn failed(detail: impl Into<String>, first_bad_sequence: Option<u64>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            first_bad_sequence,
            entries_checked: 0,
            artifacts_checked: 0,
        }
    }
}

/// `(content_hash, storage_path)` pairs found anywhere inside a payload.
pub fn artifact_refs(payload: &Value) -> Vec<(String, String)> {
    fn walk(v: &Value, out: &mut Vec<(String, String)>) {
        match v {
            Value::Object(map) => {
                if let (Some(Value::String(h)), Some(Value::String(p))) =
                    (map.get("content_hash"), map.get("storage_path"))
                {
                    out.push((h.clone(), p.clone()));
                }
                for child in map.values() {
                    walk(child, out);
                }
            }
            Value::Array(items) => {
                for child in items {
                    walk(child, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(payload, &mut out);
    out
}

pub fn verify_chain(
    chain: &Chain,
    store: &dyn Store,
    mode: VerifyMode,
    expected_head: Option<&Hash256>,
) -> VerifyReport {
    let span = tracing::info_span!("verify", run_id = %chain.identity.run_id, ?mode);
    let _enter = span.enter();

    let report = walk_chain(chain, store, mode, expected_head);
    if report.ok {
        tracing::info!(entries = report.entries_checked, artifacts = report.artifacts_checked, "chain verified");
    } else {
        tracing::warn!(first_bad = ?report.first_bad_sequence, detail = %report.detail, "chain verification failed");
    }
    report
}

fn walk_chain(
    chain: &Chain,
    store: &dyn Store,
    mode: VerifyMode,
    expected_head: Option<&Hash256>,
) -> VerifyReport {
    let algo = chain.algo;
    let mut entries_checked = 0usize;
    let mut artifacts_checked = 0usize;

    let fail = |detail: String, seq: Option<u64>, entries: usize, artifacts: usize| VerifyReport {
        ok: false,
        detail,
        first_bad_sequence: seq,
        entries_checked: entries,
        artifacts_checked: artifacts,
    };

    let genesis = genesis_hash(algo, &chain.identity, chain.created_at_ms);
    if genesis != chain.genesis {
        return fail("genesis does not match run identity".into(), Some(0), 0, 0);
    }

    let mut prev = genesis;
    for (i, e) in chain.entries.iter().enumerate() {
        let seq = e.sequence_no.get();
        if seq != i as u64 {
            return fail(
                format!("entry {i} carries sequence_no {seq}"),
                Some(i as u64),
                entries_checked,
                artifacts_checked,
            );
        }
        if e.prev_hash != prev {
            return fail(
                format!("entry {seq} prev_hash does not link to its predecessor"),
                Some(seq),
                entries_checked,
                artifacts_checked,
            );
        }
        let bytes = match store.get(&e.payload_ref) {
            Ok(b) => b,
            Err(err) => {
                return fail(
                    format!("entry {seq} payload unreadable ({}): {err}", e.payload_ref),
                    Some(seq),
                    entries_checked,
                    artifacts_checked,
                )
            }
        };
        let payload_hash = algo.digest(&bytes);
        if payload_hash != e.payload_hash {
            return fail(
                format!("entry {seq} payload hash mismatch ({})", e.payload_ref),
                Some(seq),
                entries_checked,
                artifacts_checked,
            );
        }
        let recomputed = entry_hash(algo, &prev, &payload_hash);
        if recomputed != e.entry_hash {
            return fail(
                format!("entry {seq} entry_hash mismatch"),
                Some(seq),
                entries_checked,
                artifacts_checked,
            );
        }

        if mode == VerifyMode::Deep {
            let value: Value = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(err) => {
                    return fail(
                        format!("entry {seq} payload is not JSON: {err}"),
                        Some(seq),
                        entries_checked,
                        artifacts_checked,
                    )
                }
            };
            for (expected, path) in artifact_refs(&value) {
                let ok = match store.get(&path) {
                    Ok(data) => hash_bytes(&data).to_hex() == expected,
                    Err(_) => false,
                };
                if !ok {
                    return fail(
                        format!("entry {seq} artifact content hash mismatch ({path})"),
                        Some(seq),
                        entries_checked,
                        artifacts_checked,
                    );
                }
                artifacts_checked += 1;
            }
        }

        prev = recomputed;
        entries_checked += 1;
    }

    let last_seq = chain.entries.last().map(|e| e.sequence_no.get());
    if prev != chain.head {
        return fail(
            "recomputed head does not match stored chain head".into(),
            last_seq,
            entries_checked,
            artifacts_checked,
        );
    }
    if let Some(anchor) = expected_head {
        if *anchor != prev {
            return fail(
                "recomputed head does not match the anchored head".into(),
                last_seq,
                entries_checked,
                artifacts_checked,
            );
        }
    }

    VerifyReport {
        ok: true,
        detail: format!("{entries_checked} entries verified"),
        first_bad_sequence: None,
        entries_checked,
        artifacts_checked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{EntryKind, RunIdentity};
    use serde_json::json;
    use tabseal_core::hash::HashAlgo;
    use tabseal_core::id::Ordinal;
    use tabseal_store::MemoryStore;

    fn sealed_chain(store: &MemoryStore, algo: HashAlgo) -> Chain {
        let mut chain = Chain::new(RunIdentity::new("p", "d", "r"), algo, 1_000);
        store.put("p/d/r/art.snap", b"snapshot-bytes").unwrap();
        let art_hash = hash_bytes(b"snapshot-bytes").to_hex();
        let payloads = vec![
            ("p/d/r/run_start.json", EntryKind::RunStart, json!({"status": "open"})),
            (
                "p/d/r/steps/0001_a/step.json",
                EntryKind::Step,
                json!({"artifacts": [{"kind": "output", "content_hash": art_hash, "storage_path": "p/d/r/art.snap"}]}),
            ),
            ("p/d/r/run_finish.json", EntryKind::RunFinish, json!({"status": "finished"})),
        ];
        for (i, (path, kind, payload)) in payloads.into_iter().enumerate() {
            let ord = (kind == EntryKind::Step).then(|| Ordinal::new(1));
            let (entry, bytes) = chain.prepare(kind, ord, path, &payload, i as i64).unwrap();
            store.put(path, &bytes).unwrap();
            chain.push(entry).unwrap();
        }
        chain
    }

    #[test]
    fn untouched_chain_verifies() {
        for algo in [HashAlgo::Blake3, HashAlgo::Sha256] {
            let store = MemoryStore::new();
            let chain = sealed_chain(&store, algo);
            let r = verify_chain(&chain, &store, VerifyMode::Deep, Some(&chain.head));
            assert!(r.ok, "{}", r.detail);
            assert_eq!((r.entries_checked, r.artifacts_checked), (3, 1));
        }
    }

    #[test]
    fn payload_byte_flip_reports_first_bad_entry() {
        let store = MemoryStore::new();
        let chain = sealed_chain(&store, HashAlgo::Blake3);
        let path = "p/d/r/steps/0001_a/step.json";
        let mut bytes = store.get(path).unwrap();
        bytes[3] ^= 0x01;
        store.put(path, &bytes).unwrap();
        let r = verify_chain(&chain, &store, VerifyMode::Shallow, None);
        assert!(!r.ok);
        assert_eq!(r.first_bad_sequence, Some(1));
    }

    #[test]
    fn artifact_tamper_needs_deep_mode() {
        let store = MemoryStore::new();
        let chain = sealed_chain(&store, HashAlgo::Blake3);
        store.put("p/d/r/art.snap", b"snapshot-bytez").unwrap();
        assert!(verify_chain(&chain, &store, VerifyMode::Shallow, None).ok);
        let deep = verify_chain(&chain, &store, VerifyMode::Deep, None);
        assert!(!deep.ok);
        assert_eq!(deep.first_bad_sequence, Some(1));
    }

    #[test]
    fn wrong_anchor_fails() {
        let store = MemoryStore::new();
        let chain = sealed_chain(&store, HashAlgo::Blake3);
        let r = verify_chain(&chain, &store, VerifyMode::Shallow, Some(&Hash256::ZERO));
        assert!(!r.ok);
        assert_eq!(r.first_bad_sequence, Some(2));
    }

    #[test]
    fn rewritten_entry_breaks_linkage() {
        let store = MemoryStore::new();
        let mut chain = sealed_chain(&store, HashAlgo::Blake3);
        chain.entries[0].payload_hash = Hash256::ZERO;
        let r = verify_chain(&chain, &store, VerifyMode::Shallow, None);
        assert_eq!(r.first_bad_sequence, Some(0));
    }
}
