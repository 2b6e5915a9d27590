//! In-memory store backend.
//!
//! HashMap-backed; selected by the `memory://` URI and used throughout tests to
//! avoid file I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::Store;

/// Thread-safe in-memory store. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes held across all objects.
    pub fn total_bytes(&self) -> u64 {
        self.lock()
            .map(|d| d.values().map(|v| v.len() as u64).sum())
            .unwrap_or(0)
    }

    /// Remove an object; returns whether it existed.
    pub fn remove(&self, path: &str) -> Result<bool> {
        Ok(self.lock()?.remove(path).is_some())
    }
}

impl Store for MemoryStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if path.is_empty() {
            return Err(Error::Storage("empty key".into()));
        }
        self.lock()?.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let data = self.lock()?;
        let mut result: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_overwrite() {
        let store = MemoryStore::new();
        store.put("a/b.json", b"1").unwrap();
        store.put("a/b.json", b"22").unwrap();
        assert_eq!(store.get("a/b.json").unwrap(), b"22");
        assert_eq!(store.size("a/b.json").unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_by_prefix_is_sorted() {
        let store = MemoryStore::new();
        store.put("dir/file2", b"2").unwrap();
        store.put("dir/file1", b"1").unwrap();
        store.put("other/file3", b"3").unwrap();
        assert_eq!(
            store.list("dir/").unwrap(),
            vec!["dir/file1".to_string(), "dir/file2".to_string()]
        );
    }

    #[test]
    fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put("k", b"v").unwrap();
        assert!(b.exists("k").unwrap());
        assert!(b.remove("k").unwrap());
        assert!(matches!(a.get("k"), Err(Error::NotFound(_))));
    }
}
