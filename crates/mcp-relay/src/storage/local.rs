//! Directory-backed storage.
//!
//! Keys map to paths below a root directory (`a/b/c.json` becomes
//! `{root}/a/b/c.json`). Writes use the temp-file-then-rename pattern so a
//! concurrent reader never observes a partially written object:
//!
//! 1. The body is written to a hidden sibling `.{name}.tmp`
//! 2. The temp file is flushed and closed
//! 3. The temp file is renamed over the target
//!
//! Temp files (`.{name}.tmp`) are never listed, so in-progress writes are
//! invisible to pollers. Other names starting with `.` are ordinary keys.
//! Keys containing empty, `.` or `..` segments are rejected.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::ObjectStorage;
use crate::error::{Error, Result};

/// [`ObjectStorage`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root` as the bucket, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, operation: &'static str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::storage(
                    operation,
                    key,
                    format!("invalid key segment '{segment}'"),
                ));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(segments?.join("/"))
    }
}

const TEMP_SUFFIX: &str = ".tmp";

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{TEMP_SUFFIX}"))
}

async fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_path(path);
    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(body).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    fs::rename(&temp, path).await
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.resolve("put", key)?;
        write_atomic(&path, &body)
            .await
            .map_err(|e| Error::storage("put", key, e))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve("get", key)?;
        match fs::read(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage("get", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve("exists", key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage("exists", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve("delete", key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk from the deepest directory named by the prefix.
        let dir_part = prefix.rsplit_once('/').map_or("", |(dir, _)| dir);
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve("list", dir_part)?
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage("list", prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage("list", prefix, e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::storage("list", prefix, e))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if is_temp_name(&entry.file_name().to_string_lossy()) {
                    continue;
                } else if let Some(key) = self.key_of(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    async fn storage() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::open(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn put_creates_parent_directories_and_leaves_no_temp_file() {
        let (dir, storage) = storage().await;
        storage
            .put("p/requests/s/1.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap();

        let target = dir.path().join("p/requests/s/1.json");
        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
        assert!(!dir.path().join("p/requests/s/.1.json.tmp").exists());
    }

    #[tokio::test]
    async fn temp_files_are_not_listed() {
        let (dir, storage) = storage().await;
        storage
            .put("p/requests/s/1.json", Vec::new(), "application/json")
            .await
            .unwrap();
        std::fs::write(dir.path().join("p/requests/s/.2.json.tmp"), b"partial").unwrap();

        assert_eq!(
            storage.list("p/requests/").await.unwrap(),
            vec!["p/requests/s/1.json".to_string()]
        );
    }

    #[tokio::test]
    async fn dot_names_are_listed() {
        let (_dir, storage) = storage().await;
        for key in ["p/requests/s/.x.json", "p/requests/s/.json", "p/requests/.s/1.json"] {
            storage.put(key, Vec::new(), "application/json").await.unwrap();
        }

        let mut keys = storage.list("p/requests/").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["p/requests/.s/1.json", "p/requests/s/.json", "p/requests/s/.x.json"]
        );
    }

    #[tokio::test]
    async fn list_of_missing_prefix_is_empty() {
        let (_dir, storage) = storage().await;
        assert!(storage.list("nothing/here/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, storage) = storage().await;
        storage.put("k.json", Vec::new(), "application/json").await.unwrap();
        storage.delete("k.json").await.unwrap();
        storage.delete("k.json").await.unwrap();
        assert_eq!(storage.get("k.json").await.unwrap(), None);
    }

    #[rstest]
    #[case::parent("../escape.json")]
    #[case::empty_segment("a//b.json")]
    #[case::absolute("/etc/passwd")]
    #[case::dot("a/./b.json")]
    #[tokio::test]
    async fn unsafe_keys_are_rejected(#[case] key: &str) {
        let (_dir, storage) = storage().await;
        let err = storage.get(key).await.unwrap_err();
        assert!(matches!(err, Error::Storage { operation: "get", .. }));
    }
}
