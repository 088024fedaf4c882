//! Filesystem-backed blob store.

use crate::blob::{validate_blob_name, BlobStore};
use crate::error::EnvError;
use crate::types::BlobRef;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Blob store keeping one file per blob under a root directory.
///
/// A blob named `snapshots/tick-00000003.json` lives at
/// `<root>/snapshots/tick-00000003.json` and its location is the name itself.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, EnvError> {
        validate_blob_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, location: &BlobRef) -> Result<Vec<u8>, EnvError> {
        let path = self.path_for(location.as_str())?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EnvError::BlobNotFound(location.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<BlobRef, EnvError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // write-then-rename so readers never observe a torn document
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(BlobRef::new(name))
    }
}
