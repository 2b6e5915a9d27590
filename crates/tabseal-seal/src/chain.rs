use serde::{Deserialize, Serialize};

use tabseal_core::error::{Error, Result};
use tabseal_core::hash::{canonical_json_bytes, Hash256, HashAlgo};
use tabseal_core::id::{Ordinal, SequenceNo};

use crate::CHAIN_FORMAT_VERSION;

/// `{project, dataset, run_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    pub project: String,
    pub dataset: String,
    pub run_id: String,
}

impl RunIdentity {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            run_id: run_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    RunStart,
    Step,
    RunFinish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub sequence_no: SequenceNo,
    pub kind: EntryKind,
    /// Step ordinal for `Step` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<Ordinal>,
    /// Store key of the sealed payload bytes.
    pub payload_ref: String,
    pub prev_hash: Hash256,
    pub payload_hash: Hash256,
    pub entry_hash: Hash256,
    pub timestamp_ms: i64,
}

fn put_lp(parts: &mut Vec<u8>, s: &str) {
    parts.extend_from_slice(&(s.len() as u64).to_be_bytes());
    parts.extend_from_slice(s.as_bytes());
}

/// Public genesis: `H("tabseal.genesis.v1" ‖ lp(run_id) ‖ lp(project) ‖ lp(dataset) ‖ i64be(created_at_ms))`.
pub fn genesis_hash(algo: HashAlgo, id: &RunIdentity, created_at_ms: i64) -> Hash256 {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(b"tabseal.genesis.v1");
    put_lp(&mut buf, &id.run_id);
    put_lp(&mut buf, &id.project);
    put_lp(&mut buf, &id.dataset);
    buf.extend_from_slice(&created_at_ms.to_be_bytes());
    algo.digest(&buf)
}

/// `entry_hash = H(prev_hash ‖ payload_hash)`.
pub fn entry_hash(algo: HashAlgo, prev: &Hash256, payload_hash: &Hash256) -> Hash256 {
    algo.digest_parts(&[prev.as_bytes(), payload_hash.as_bytes()])
}

/// Seal already-serialized payload bytes. Pure and deterministic.
#[allow(clippy::too_many_arguments)]
pub fn seal_bytes(
    algo: HashAlgo,
    sequence_no: SequenceNo,
    kind: EntryKind,
    ordinal: Option<Ordinal>,
    payload_ref: &str,
    prev_hash: Hash256,
    payload_bytes: &[u8],
    timestamp_ms: i64,
) -> ChainEntry {
    let payload_hash = algo.digest(payload_bytes);
    ChainEntry {
        sequence_no,
        kind,
        ordinal,
        payload_ref: payload_ref.to_string(),
        prev_hash,
        payload_hash,
        entry_hash: entry_hash(algo, &prev_hash, &payload_hash),
        timestamp_ms,
    }
}

/// Seal a payload: returns the entry and the canonical bytes it was computed over.
/// Those exact bytes must be what gets persisted at `payload_ref`.
#[allow(clippy::too_many_arguments)]
pub fn seal<T: Serialize>(
    algo: HashAlgo,
    sequence_no: SequenceNo,
    kind: EntryKind,
    ordinal: Option<Ordinal>,
    payload_ref: &str,
    prev_hash: Hash256,
    payload: &T,
    timestamp_ms: i64,
) -> Result<(ChainEntry, Vec<u8>)> {
    let bytes = canonical_json_bytes(payload)?;
    let entry = seal_bytes(
        algo,
        sequence_no,
        kind,
        ordinal,
        payload_ref,
        prev_hash,
        &bytes,
        timestamp_ms,
    );
    Ok((entry, bytes))
}

/// The persisted `chain.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub version: String,
    pub identity: RunIdentity,
    pub algo: HashAlgo,
    pub created_at_ms: i64,
    pub genesis: Hash256,
    pub entries: Vec<ChainEntry>,
    pub head: Hash256,
}

impl Chain {
    pub fn new(identity: RunIdentity, algo: HashAlgo, created_at_ms: i64) -> Self {
        let genesis = genesis_hash(algo, &identity, created_at_ms);
        Self {
            version: CHAIN_FORMAT_VERSION.to_string(),
            identity,
            algo,
            created_at_ms,
            genesis,
            entries: Vec::new(),
            head: genesis,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_sequence(&self) -> SequenceNo {
        SequenceNo::new(self.entries.len() as u64)
    }

    pub fn last(&self) -> Option<&ChainEntry> {
        self.entries.last()
    }

    /// Build (without appending) the next entry for `payload`.
    pub fn prepare<T: Serialize>(
        &self,
        kind: EntryKind,
        ordinal: Option<Ordinal>,
        payload_ref: &str,
        payload: &T,
        timestamp_ms: i64,
    ) -> Result<(ChainEntry, Vec<u8>)> {
        seal(
            self.algo,
            self.next_sequence(),
            kind,
            ordinal,
            payload_ref,
            self.head,
            payload,
            timestamp_ms,
        )
    }

    /// Append a prepared entry. Rejects anything that does not extend the head.
    pub fn push(&mut self, entry: ChainEntry) -> Result<()> {
        if entry.sequence_no != self.next_sequence() {
            return Err(Error::Invariant(format!(
                "chain expects sequence {} but got {}",
                self.next_sequence().get(),
                entry.sequence_no.get()
            )));
        }
        if entry.prev_hash != self.head {
            return Err(Error::Invariant(format!(
                "entry {} does not extend the chain head",
                entry.sequence_no.get()
            )));
        }
        if entry.entry_hash != entry_hash(self.algo, &entry.prev_hash, &entry.payload_hash) {
            return Err(Error::Invariant(format!(
                "entry {} hash does not match its parts",
                entry.sequence_no.get()
            )));
        }
        self.head = entry.entry_hash;
        self.entries.push(entry);
        Ok(())
    }

    /// Compact canonical JSON for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        canonical_json_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> RunIdentity {
        RunIdentity::new("proj", "ds", "run_1")
    }

    #[test]
    fn seal_is_pure() {
        let p = json!({"b": 2, "a": 1});
        let (e1, b1) = seal(HashAlgo::Blake3, SequenceNo::new(0), EntryKind::RunStart, None, "x", Hash256::ZERO, &p, 5).unwrap();
        let (e2, b2) = seal(HashAlgo::Blake3, SequenceNo::new(0), EntryKind::RunStart, None, "x", Hash256::ZERO, &p, 5).unwrap();
        assert_eq!(e1, e2);
        assert_eq!(b1, b2);
        assert_eq!(b1, br#"{"a":1,"b":2}"#);
        assert_eq!(
            e1.entry_hash,
            HashAlgo::Blake3.digest_parts(&[Hash256::ZERO.as_bytes(), e1.payload_hash.as_bytes()])
        );
    }

    #[test]
    fn genesis_depends_on_identity_and_time() {
        let a = genesis_hash(HashAlgo::Blake3, &id(), 1);
        assert_ne!(a, genesis_hash(HashAlgo::Blake3, &id(), 2));
        assert_ne!(a, genesis_hash(HashAlgo::Blake3, &RunIdentity::new("proj", "ds", "run_2"), 1));
        assert_ne!(a, genesis_hash(HashAlgo::Sha256, &id(), 1));
    }

    #[test]
    fn push_enforces_linkage() {
        let mut c = Chain::new(id(), HashAlgo::Sha256, 0);
        let (e0, _) = c.prepare(EntryKind::RunStart, None, "a", &json!({"n": 0}), 1).unwrap();
        let stale = e0.clone();
        c.push(e0).unwrap();
        assert!(c.push(stale).is_err());
        let (e1, _) = c.prepare(EntryKind::Step, Some(Ordinal::new(1)), "b", &json!({"n": 1}), 2).unwrap();
        assert_eq!(e1.prev_hash, c.head);
        c.push(e1).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(Chain::from_bytes(&c.to_bytes().unwrap()).unwrap(), c);
    }
}
