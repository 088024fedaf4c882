//! Message channel abstraction shared by the orchestrator and workers.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{MessageId, OutgoingMessage, ReceiptHandle, ReceivedMessage};
use std::time::Duration;

/// Batch limit used by queue services that cap bulk submission at 10.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Abstraction over a queue service with named channels.
///
/// # Delivery Contract
///
/// - **At-least-once**: a message stays in the channel until deleted; an
///   undeleted delivery becomes visible again after the visibility timeout.
/// - **Single-use handles**: each delivery carries its own `ReceiptHandle`.
/// - **Idempotent ack**: deleting an unknown, expired or already-deleted
///   handle returns `Ok(())`.
/// - **Ordered groups**: messages sharing a group key are delivered in
///   publish order with at most one delivery of the group in flight.
///
/// ```text
/// Producer                  Channel                     Consumer
///   |-- publish(msg) -------->|                            |
///   |                         |<--------- receive(max, wait)|
///   |                         |-- [msg, handle] ---------->|
///   |                         |<--------- delete(handle) ---|
/// ```
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    /// Publishes one message.
    async fn publish(&self, channel: &str, message: OutgoingMessage) -> Result<MessageId, EnvError>;

    /// Publishes a chunk of at most `max_batch_size()` messages in one call.
    ///
    /// # Returns
    /// * `Err(EnvError::BatchTooLarge)` - the chunk exceeds the limit
    async fn publish_chunk(
        &self,
        channel: &str,
        messages: Vec<OutgoingMessage>,
    ) -> Result<Vec<MessageId>, EnvError>;

    /// Receives up to `max_messages`, waiting at most `wait` when empty.
    async fn receive(
        &self,
        channel: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, EnvError>;

    /// Acknowledges a delivery.
    async fn delete(&self, channel: &str, handle: &ReceiptHandle) -> Result<(), EnvError>;

    /// Largest chunk accepted by `publish_chunk`.
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    /// Publishes any number of messages in chunks of `max_batch_size()`.
    ///
    /// Every chunk is submitted independently: a failed chunk is recorded in
    /// the report and the remaining chunks are still sent, each exactly once.
    async fn publish_batch(&self, channel: &str, messages: Vec<OutgoingMessage>) -> BatchReport {
        let limit = self.max_batch_size().max(1);
        let mut report = BatchReport::default();
        let mut pending = messages.into_iter().peekable();
        let mut chunk_index = 0;

        while pending.peek().is_some() {
            let chunk: Vec<OutgoingMessage> = pending.by_ref().take(limit).collect();
            let len = chunk.len();
            match self.publish_chunk(channel, chunk).await {
                Ok(ids) => report.sent += ids.len(),
                Err(e) => report.failed_chunks.push(ChunkFailure {
                    chunk_index,
                    messages: len,
                    error: e,
                }),
            }
            chunk_index += 1;
        }

        report.chunks = chunk_index;
        report
    }
}

/// A chunk that could not be submitted.
#[derive(Debug)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub messages: usize,
    pub error: EnvError,
}

/// Outcome of `publish_batch`.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Messages accepted by the channel
    pub sent: usize,

    /// Chunks submitted (successful or not)
    pub chunks: usize,

    /// Chunks rejected by the channel
    pub failed_chunks: Vec<ChunkFailure>,
}

impl BatchReport {
    /// Number of messages lost to failed chunks.
    pub fn failed(&self) -> usize {
        self.failed_chunks.iter().map(|f| f.messages).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}
