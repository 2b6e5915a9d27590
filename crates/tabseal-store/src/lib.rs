#![forbid(unsafe_code)]
//! tabseal-store: where runs are persisted.
//!
//! A `Store` is a flat key→bytes map addressed by `/`-separated relative paths.
//! `FsStore` maps keys under a root directory; `MemoryStore` keeps them in a
//! `HashMap` for tests and ephemeral runs. Remote object stores plug in by
//! implementing the same trait.
//!
//! Snapshot artifacts are wrapped in a small binary envelope (`envelope`) that
//! records the compression codec and lengths ahead of the payload.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod fs;
pub mod memory;

use std::sync::Arc;

use tabseal_core::config::StoreConfig;

pub use codec::Codec;
pub use envelope::{EnvelopeHeader, HEADER_LEN};
pub use error::{Error, Result};
pub use fs::FsStore;
pub use memory::MemoryStore;

/// Abstract key→bytes storage.
///
/// Implementations must be safe to share across independent runs.
pub trait Store: Send + Sync {
    /// Write (or replace) the object at `path`.
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read the whole object. Missing objects are `Error::NotFound`.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// All keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> Result<bool> {
        match self.get(path) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size in bytes of the object at `path`.
    fn size(&self, path: &str) -> Result<u64> {
        self.get(path).map(|b| b.len() as u64)
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        (**self).put(path, bytes)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        (**self).get(path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path)
    }

    fn size(&self, path: &str) -> Result<u64> {
        (**self).size(path)
    }
}

/// Join path components with `/`, skipping empty parts.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the store selected by `cfg` (`file://`, bare path, or `memory://`).
pub fn build_store_from_config(cfg: &StoreConfig) -> Result<Arc<dyn Store>> {
    match cfg.scheme() {
        Some("memory") => Ok(Arc::new(MemoryStore::new())),
        Some("file") | None => Ok(Arc::new(FsStore::new(cfg.local_root()))),
        Some(other) => Err(Error::Config(format!(
            "unsupported store scheme '{other}'; only file:// and memory:// are built in"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_key_skips_empty_parts() {
        assert_eq!(join_key(&["a/", "", "/b", "c.json"]), "a/b/c.json");
    }

    #[test]
    fn builder_selects_backend_by_scheme() {
        let mem = StoreConfig {
            uri: Some("memory://".into()),
            root: String::new(),
        };
        let store = build_store_from_config(&mem).unwrap();
        store.put("x", b"1").unwrap();
        assert_eq!(store.get("x").unwrap(), b"1");

        let s3 = StoreConfig {
            uri: Some("s3://bucket/runs".into()),
            root: String::new(),
        };
        let err = build_store_from_config(&s3).err().unwrap();
        assert!(err.to_string().contains("s3"));
    }
}
