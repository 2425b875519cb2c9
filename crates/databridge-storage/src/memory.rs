//! In-memory storage backend — for tests and ephemeral deployments only.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory [`StorageBackend`] backed by a sorted map.
///
/// Data does not survive process restart. Intended for unit tests and for
/// `DATABRIDGE_STORAGE_BACKEND=memory` development deployments — never for
/// production, since a sealed vault with no durable storage cannot recover
/// its encrypted data after a crash.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Read {
            key: key.to_owned(),
            reason: "lock poisoned".to_owned(),
        })?;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Write {
            key: key.to_owned(),
            reason: "lock poisoned".to_owned(),
        })?;
        data.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Delete {
            key: key.to_owned(),
            reason: "lock poisoned".to_owned(),
        })?;
        data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::List {
            prefix: prefix.to_owned(),
            reason: "lock poisoned".to_owned(),
        })?;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let backend = MemoryBackend::new();
        backend.put("a/b", b"hello").await.unwrap();
        assert_eq!(backend.get("a/b").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("k", b"v").await.unwrap();
        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        backend.put("a/1", b"x").await.unwrap();
        backend.put("a/2", b"x").await.unwrap();
        backend.put("b/1", b"x").await.unwrap();
        let mut keys = backend.list("a/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);
    }

    #[tokio::test]
    async fn exists_default_impl() {
        let backend = MemoryBackend::new();
        backend.put("k", b"v").await.unwrap();
        assert!(backend.exists("k").await.unwrap());
        assert!(!backend.exists("missing").await.unwrap());
    }
}
