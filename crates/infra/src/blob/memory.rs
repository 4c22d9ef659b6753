use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{validate_key, BlobError, BlobStore};

/// In-memory blob store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .blobs
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn poisoned() -> BlobError {
        BlobError::Io("in-memory blob store lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        validate_key(key)?;
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        validate_key(key)?;
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned())?;
        blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        validate_key(key)?;
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(blobs.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_copy() {
        let store = InMemoryBlobStore::new();
        store.put("uploads/a.txt", b"hello".to_vec()).await.unwrap();

        assert_eq!(store.get("uploads/a.txt").await.unwrap(), b"hello");
        store.copy("uploads/a.txt", "published/a.txt").await.unwrap();
        assert!(store.exists("published/a.txt").await.unwrap());
        assert_eq!(store.keys(), vec!["published/a.txt", "uploads/a.txt"]);

        assert_eq!(
            store.get("missing.txt").await,
            Err(BlobError::NotFound("missing.txt".to_string()))
        );
    }
}
