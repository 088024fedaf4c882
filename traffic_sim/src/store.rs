//! In-memory blob store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use traffic_env::{validate_blob_name, BlobRef, BlobStore, EnvError};

/// Blob store over a shared map; clones see the same blobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stored names under `prefix`, in order.
    pub async fn names(&self, prefix: &str) -> Vec<String> {
        self.blobs
            .read()
            .await
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, location: &BlobRef) -> Result<Vec<u8>, EnvError> {
        self.blobs
            .read()
            .await
            .get(location.as_str())
            .cloned()
            .ok_or_else(|| EnvError::BlobNotFound(location.to_string()))
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<BlobRef, EnvError> {
        validate_blob_name(name)?;
        self.blobs.write().await.insert(name.to_string(), bytes);
        Ok(BlobRef::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let store = MemoryBlobStore::new();
        let loc = store.put("a/b.json", b"1".to_vec()).await.unwrap();
        store.put("a/b.json", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get(&loc).await.unwrap(), b"2");
        assert_eq!(store.names("a/").await, vec!["a/b.json".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_and_invalid() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get(&BlobRef::new("nope")).await,
            Err(EnvError::BlobNotFound(_))
        ));
        assert!(matches!(
            store.put("../escape", vec![]).await,
            Err(EnvError::InvalidBlobName(_))
        ));
    }
}
