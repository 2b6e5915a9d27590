use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::Store;

/// Local filesystem store rooted at a directory.
///
/// Keys map to files below the root; `..` and absolute keys are rejected.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty() {
            return Err(Error::Storage("empty key".into()));
        }
        for c in rel.components() {
            match c {
                Component::Normal(_) => {}
                _ => return Err(Error::Storage(format!("key escapes store root: {key}"))),
            }
        }
        Ok(self.root.join(rel))
    }
}

impl Store for FsStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let p = self.resolve(path)?;
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage(format!("mkparent: {e}")))?;
        }
        // Write-then-rename so readers never observe a half-written object.
        let mut tmp_name = p.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp-write");
        let tmp = p.with_file_name(tmp_name);
        {
            let mut f = File::create(&tmp).map_err(|e| Error::Storage(format!("create: {e}")))?;
            f.write_all(bytes)
                .map_err(|e| Error::Storage(format!("write: {e}")))?;
            f.flush().map_err(|e| Error::Storage(format!("flush: {e}")))?;
        }
        fs::rename(&tmp, &p).map_err(|e| Error::Storage(format!("rename: {e}")))?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let p = self.resolve(path)?;
        fs::read(&p).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(path.to_string()),
            _ => Error::Storage(format!("read {path}: {e}")),
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk the deepest directory named by the prefix, then filter by the full prefix.
        let dir_part = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };
        let mut results = Vec::new();
        if !start.is_dir() {
            return Ok(results);
        }

        fn visit_dirs(dir: &Path, root: &Path, results: &mut Vec<String>) -> std::io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    visit_dirs(&path, root, results)?;
                } else if let Ok(rel) = path.strip_prefix(root) {
                    let key = rel
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    if !key.ends_with(".tmp-write") {
                        results.push(key);
                    }
                }
            }
            Ok(())
        }

        visit_dirs(&start, &self.root, &mut results)
            .map_err(|e| Error::Storage(format!("list: {e}")))?;
        results.retain(|k| k.starts_with(prefix));
        results.sort();
        Ok(results)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn size(&self, path: &str) -> Result<u64> {
        let p = self.resolve(path)?;
        let meta = fs::metadata(&p).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(path.to_string()),
            _ => Error::Storage(format!("size: {e}")),
        })?;
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.put("p/d/run_1/run.json", b"{}").unwrap();
        store.put("p/d/run_1/steps/0001_a/step.json", b"[]").unwrap();
        store.put("p/d/run_2/run.json", b"{}").unwrap();

        assert_eq!(store.get("p/d/run_1/run.json").unwrap(), b"{}");
        assert_eq!(store.size("p/d/run_1/steps/0001_a/step.json").unwrap(), 2);
        assert_eq!(
            store.list("p/d/run_1/").unwrap(),
            vec![
                "p/d/run_1/run.json".to_string(),
                "p/d/run_1/steps/0001_a/step.json".to_string(),
            ]
        );
        assert_eq!(store.list("p/d/run_").unwrap().len(), 3);
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(matches!(store.get("nope.json"), Err(Error::NotFound(_))));
        assert!(!store.exists("nope.json").unwrap());
    }

    #[test]
    fn traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.put("../escape", b"x").is_err());
        assert!(store.put("/abs", b"x").is_err());
    }
}
