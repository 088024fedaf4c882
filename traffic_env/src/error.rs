//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur talking to the message channel or blob store.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The named channel does not exist
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// A chunk exceeded the channel's batch limit
    #[error("Batch of {size} messages exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Publish/receive failed but may succeed on retry
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// No blob stored at the given location
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Blob name is empty or escapes the store root
    #[error("Invalid blob name: {0}")]
    InvalidBlobName(String),

    /// Underlying storage failure
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transient channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelError(msg.into())
    }

    /// Creates a not-found error for a channel name.
    pub fn no_channel(name: impl std::fmt::Display) -> Self {
        Self::ChannelNotFound(name.to_string())
    }

    /// True for failures a caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelError(_) | Self::Timeout(_) | Self::Io(_))
    }
}
