//! Common types for the environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to a message when it is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random MessageId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Single-use acknowledgment token issued with every delivery.
///
/// A redelivered message carries a fresh handle; deleting with an older
/// handle of the same message is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    /// Creates a new random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ReceiptHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A message to publish on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Opaque payload bytes (an encoded event envelope)
    pub payload: Vec<u8>,

    /// Ordered delivery-group key; `None` on unordered streams
    pub group: Option<String>,
}

impl OutgoingMessage {
    /// Creates an unordered message.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            group: None,
        }
    }

    /// Creates a message in an ordered delivery group.
    pub fn grouped(payload: Vec<u8>, group: impl Into<String>) -> Self {
        Self {
            payload,
            group: Some(group.into()),
        }
    }
}

/// A delivered message.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Stable id across redeliveries
    pub id: MessageId,

    /// The raw payload bytes
    pub payload: Vec<u8>,

    /// Handle used to acknowledge (delete) this delivery
    pub handle: ReceiptHandle,

    /// How many times this message has been delivered, including this one
    pub receive_count: u32,
}

impl ReceivedMessage {
    /// Returns the payload as lossy UTF-8, for logging poison messages.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Location handle of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_handles_are_unique() {
        assert_ne!(ReceiptHandle::new(), ReceiptHandle::new());
    }

    #[test]
    fn test_blob_ref_display() {
        let r = BlobRef::new("bundle/roads.json");
        assert_eq!(r.to_string(), "bundle/roads.json");
        assert_eq!(r.as_str(), "bundle/roads.json");
    }

    #[test]
    fn test_payload_lossy() {
        let msg = ReceivedMessage {
            id: MessageId::new(),
            payload: b"{not json".to_vec(),
            handle: ReceiptHandle::new(),
            receive_count: 1,
        };
        assert_eq!(msg.payload_lossy(), "{not json");
    }
}
