//! Object store implementations.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use voxdub_core::error::{Result, VoxdubError};

use crate::ObjectStore;

/// Directory-backed store. Keys map to relative paths under `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(VoxdubError::Storage(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VoxdubError::Storage(format!("{key}: {e}")))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| VoxdubError::Storage(format!("{key}: {e}")))?;
        debug!(key, content_type, bytes = body.len(), "Object stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VoxdubError::Storage(format!("object not found: {key}")))
            }
            Err(e) => Err(VoxdubError::Storage(format!("{key}: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VoxdubError::Storage(format!("{key}: {e}"))),
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}

/// In-memory store for tests and `serve --in-memory`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Sorted list of stored keys.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| VoxdubError::Storage(format!("object not found: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("mem://{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("input/1700000000000.webm", Bytes::from_static(b"abc"), "audio/webm")
            .await
            .unwrap();
        assert!(dir.path().join("input/1700000000000.webm").exists());

        let data = store.get("input/1700000000000.webm").await.unwrap();
        assert_eq!(data.as_ref(), b"abc");

        store.delete("input/1700000000000.webm").await.unwrap();
        assert!(!dir.path().join("input/1700000000000.webm").exists());
    }

    #[tokio::test]
    async fn test_fs_store_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.delete("transcript/404.json").await.unwrap();
        store.delete("transcript/404.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_get_missing_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get("input/none.webm").await.unwrap_err();
        assert!(matches!(err, VoxdubError::Storage(m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for key in ["../etc/passwd", "/abs/path", "", "input/../../x"] {
            let err = store
                .put(key, Bytes::from_static(b"x"), "text/plain")
                .await
                .unwrap_err();
            assert!(matches!(err, VoxdubError::Storage(_)), "key {key:?}");
        }
    }

    #[tokio::test]
    async fn test_memory_store_keys_and_uri() {
        let store = MemoryObjectStore::new();
        store.put("b", Bytes::new(), "x").await.unwrap();
        store.put("a", Bytes::new(), "x").await.unwrap();
        assert_eq!(store.keys().await, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.uri("a"), "mem://a");
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(!store.contains("a").await);
    }
}
