//! Blob store abstraction for bulk payloads.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::BlobRef;

/// Storage for bootstrap bundles and exported snapshots.
///
/// Locations are resolved from configuration, never discovered.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Fetches the bytes stored at `location`.
    ///
    /// # Returns
    /// * `Err(EnvError::BlobNotFound)` - nothing stored there
    async fn get(&self, location: &BlobRef) -> Result<Vec<u8>, EnvError>;

    /// Stores `bytes` under `name`, overwriting, and returns its location.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<BlobRef, EnvError>;
}

/// Validates a blob name: non-empty, relative, no `..` or empty segments.
pub fn validate_blob_name(name: &str) -> Result<(), EnvError> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(EnvError::InvalidBlobName(name.to_string()));
    }
    Ok(())
}
