//! Per-run rowhash memo.
//!
//! Maps a row key to the canonical bytes last hashed for it and the resulting
//! hash. A lookup only hits when the new bytes are identical, so a stale
//! entry can never leak into a result. Entries are scoped to one layout
//! signature; binding a different layout (columns added/removed, dtype or
//! grouping changed) drops everything.

use std::collections::HashMap;

use tabseal_core::hash::Hash256;
use tabseal_core::types::RowKey;

#[derive(Debug)]
pub struct RowHashCache {
    signature: Option<Hash256>,
    entries: HashMap<RowKey, (Vec<u8>, Hash256)>,
    bytes: usize,
    max_bytes: usize,
    hits: u64,
    misses: u64,
}

impl RowHashCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            signature: None,
            entries: HashMap::new(),
            bytes: 0,
            max_bytes,
            hits: 0,
            misses: 0,
        }
    }

    /// Scope the cache to a layout, invalidating it if the layout changed.
    pub fn bind(&mut self, signature: Hash256) {
        if self.signature != Some(signature) {
            if self.signature.is_some() && !self.entries.is_empty() {
                tracing::debug!(entries = self.entries.len(), "rowhash cache invalidated");
            }
            self.entries.clear();
            self.bytes = 0;
            self.signature = Some(signature);
        }
    }

    pub fn lookup(&mut self, key: &RowKey, encoded: &[u8]) -> Option<Hash256> {
        match self.entries.get(key) {
            Some((bytes, hash)) if bytes.as_slice() == encoded => {
                self.hits += 1;
                Some(*hash)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Record a freshly computed hash. Silently skipped once the byte budget is full.
    pub fn insert(&mut self, key: &RowKey, encoded: &[u8], hash: Hash256) {
        let cost = entry_cost(key, encoded);
        if let Some((old, _)) = self.entries.remove(key) {
            self.bytes -= entry_cost(key, &old);
        }
        if self.bytes + cost > self.max_bytes {
            return;
        }
        self.bytes += cost;
        self.entries.insert(key.clone(), (encoded.to_vec(), hash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
        self.signature = None;
    }
}

fn entry_cost(key: &RowKey, encoded: &[u8]) -> usize {
    key.as_str().len() + encoded.len() + 32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabseal_core::hash::hash_bytes;

    #[test]
    fn hit_requires_identical_bytes() {
        let mut c = RowHashCache::new(1 << 20);
        c.bind(hash_bytes(b"layout"));
        let k = RowKey::from("1");
        c.insert(&k, b"abc", hash_bytes(b"abc"));
        assert_eq!(c.lookup(&k, b"abc"), Some(hash_bytes(b"abc")));
        assert_eq!(c.lookup(&k, b"abd"), None);
        assert_eq!((c.hits(), c.misses()), (1, 1));
    }

    #[test]
    fn rebinding_to_new_layout_clears() {
        let mut c = RowHashCache::new(1 << 20);
        c.bind(hash_bytes(b"a"));
        c.insert(&RowKey::from("1"), b"x", hash_bytes(b"x"));
        c.bind(hash_bytes(b"a"));
        assert_eq!(c.len(), 1);
        c.bind(hash_bytes(b"b"));
        assert!(c.is_empty());
        assert_eq!(c.bytes(), 0);
    }

    #[test]
    fn budget_bounds_inserts() {
        let mut c = RowHashCache::new(100);
        c.bind(hash_bytes(b"a"));
        for i in 0..10 {
            let k = RowKey(i.to_string());
            c.insert(&k, &[0u8; 30], hash_bytes(&[0u8; 30]));
        }
        assert!(c.bytes() <= 100);
        assert!(c.len() < 10);
    }
}
