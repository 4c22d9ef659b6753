//! Object storage collaborator used by file-oriented job handlers.
//!
//! Keys are relative, `/`-separated paths (`uploads/p-1/0193...-plan.pdf`).
//! Signed URLs and bucket credentials live outside the job system.

pub mod fs;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;

/// Blob store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("blob storage error: {0}")]
    Io(String),
}

/// Minimal object-store interface.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError>;

    /// Server-side copy where the backend supports it; read + write otherwise.
    async fn copy(&self, from: &str, to: &str) -> Result<(), BlobError> {
        let bytes = self.get(from).await?;
        self.put(to, bytes).await
    }
}

/// Reject keys that could escape the store's namespace.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");

    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Last path segment of a key.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
