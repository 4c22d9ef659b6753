use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{validate_key, BlobError, BlobStore};

/// Blob store rooted at a local directory.
///
/// Keys map directly onto relative paths under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

fn io_error(key: &str, err: std::io::Error) -> BlobError {
    match err.kind() {
        ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
        _ => BlobError::Io(format!("{key}: {err}")),
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_error(key, e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), BlobError> {
        let src = self.path_for(from)?;
        let dst = self.path_for(to)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(to, e))?;
        }
        tokio::fs::copy(&src, &dst)
            .await
            .map(|_| ())
            .map_err(|e| io_error(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_through_the_filesystem() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert_eq!(store.root(), dir.path());

        store.put("uploads/p-1/plan.pdf", b"%PDF".to_vec()).await.unwrap();
        assert!(store.exists("uploads/p-1/plan.pdf").await.unwrap());
        store.copy("uploads/p-1/plan.pdf", "published/p-1/plan.pdf").await.unwrap();
        assert_eq!(store.get("published/p-1/plan.pdf").await.unwrap(), b"%PDF");

        assert!(matches!(store.get("nope.bin").await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.put("../escape", vec![]).await, Err(BlobError::InvalidKey(_))));
        assert!(dir.path().join("published/p-1/plan.pdf").is_file());
    }
}
