//! In-memory message channel with fault injection.
//!
//! Models a hosted queue service closely enough to exercise the delivery
//! contract: visibility timeouts, single-use receipt handles, ordered groups
//! with content-based deduplication, and a batch limit of 10. A
//! [`BrokerController`] injects the faults the orchestrator and workers must
//! tolerate.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use traffic_env::{
    EnvError, MessageChannel, MessageId, OutgoingMessage, ReceiptHandle, ReceivedMessage,
    TrafficContext, DEFAULT_MAX_BATCH_SIZE,
};

/// Default time an undeleted delivery stays hidden.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Window in which an identical grouped message is dropped as a duplicate.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// A message held by the broker.
#[derive(Debug, Clone)]
struct Stored {
    id: MessageId,
    payload: Vec<u8>,
    group: Option<String>,
    /// Hidden until this virtual time
    visible_at: Duration,
    /// Handle of the delivery in flight, if any
    handle: Option<ReceiptHandle>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<Stored>,
    /// Digest -> (message id, expiry) for grouped messages
    dedup: BTreeMap<[u8; 32], (MessageId, Duration)>,
}

/// Faults currently in effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Faults {
    /// Chance that an unordered publish is stored twice
    pub duplicate_probability: f64,
    /// Deliver visible messages in random order
    pub shuffle: bool,
    /// Per channel: hide newly published messages for this long
    pub delivery_delay: BTreeMap<String, Duration>,
    /// Number of upcoming receive calls that fail
    pub fail_receives: u32,
    /// Number of upcoming publish calls (or chunks) that fail
    pub fail_publishes: u32,
}

/// Counters for assertions and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub duplicated: u64,
    pub deduplicated: u64,
    pub delivered: u64,
    pub redelivered: u64,
    pub deleted: u64,
    /// Deletes with an unknown, expired or reused handle
    pub stale_deletes: u64,
    pub injected_failures: u64,
}

struct BrokerState {
    queues: BTreeMap<String, Queue>,
    faults: Faults,
    rng: ChaCha8Rng,
    stats: BrokerStats,
}

impl BrokerState {
    fn enqueue(
        &mut self,
        channel: &str,
        message: OutgoingMessage,
        now: Duration,
        dedup_window: Duration,
    ) -> Result<MessageId, EnvError> {
        let queue = self
            .queues
            .get_mut(channel)
            .ok_or_else(|| EnvError::no_channel(channel))?;

        let visible_at = now + self.faults.delivery_delay.get(channel).copied().unwrap_or_default();

        if let Some(group) = &message.group {
            queue.dedup.retain(|_, (_, expires)| *expires > now);
            let mut hasher = blake3::Hasher::new();
            hasher.update(group.as_bytes());
            hasher.update(&[0]);
            hasher.update(&message.payload);
            let digest = *hasher.finalize().as_bytes();
            if let Some((id, _)) = queue.dedup.get(&digest) {
                debug!("Dropping duplicate in group {} on {}", group, channel);
                self.stats.deduplicated += 1;
                return Ok(*id);
            }
            let id = MessageId::new();
            queue.dedup.insert(digest, (id, now + dedup_window));
            queue.messages.push_back(stored(id, message, visible_at));
            self.stats.published += 1;
            return Ok(id);
        }

        let id = MessageId::new();
        let duplicate = self.faults.duplicate_probability > 0.0
            && self.rng.gen_bool(self.faults.duplicate_probability.min(1.0));
        if duplicate {
            queue
                .messages
                .push_back(stored(MessageId::new(), message.clone(), visible_at));
            self.stats.duplicated += 1;
        }
        queue.messages.push_back(stored(id, message, visible_at));
        self.stats.published += 1;
        Ok(id)
    }

    fn take_injected_publish_failure(&mut self) -> Result<(), EnvError> {
        if self.faults.fail_publishes > 0 {
            self.faults.fail_publishes -= 1;
            self.stats.injected_failures += 1;
            return Err(EnvError::channel("injected publish failure"));
        }
        Ok(())
    }
}

fn stored(id: MessageId, message: OutgoingMessage, visible_at: Duration) -> Stored {
    Stored {
        id,
        payload: message.payload,
        group: message.group,
        visible_at,
        handle: None,
        receive_count: 0,
    }
}

/// Named in-memory queues driven by a context clock.
pub struct InMemoryChannel<C: TrafficContext> {
    context: Arc<C>,
    state: Arc<Mutex<BrokerState>>,
    visibility_timeout: Duration,
    dedup_window: Duration,
    batch_limit: usize,
}

impl<C: TrafficContext> InMemoryChannel<C> {
    /// Creates a broker with the given channels. `seed` drives fault injection.
    pub fn new<I, S>(context: Arc<C>, seed: u64, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues = channels
            .into_iter()
            .map(|name| (name.into(), Queue::default()))
            .collect();
        Self {
            context,
            state: Arc::new(Mutex::new(BrokerState {
                queues,
                faults: Faults::default(),
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: BrokerStats::default(),
            })),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            batch_limit: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Handle for injecting faults into this broker.
    pub fn controller(&self) -> BrokerController {
        BrokerController {
            state: Arc::clone(&self.state),
        }
    }

    /// Messages stored on `channel`, in flight or not.
    pub async fn depth(&self, channel: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(channel).map_or(0, |q| q.messages.len())
    }

    pub async fn stats(&self) -> BrokerStats {
        self.state.lock().await.stats
    }

    async fn take_visible(&self, channel: &str, max: usize) -> Result<Vec<ReceivedMessage>, EnvError> {
        let now = self.context.now();
        let mut guard = self.state.lock().await;
        let BrokerState {
            queues,
            faults,
            rng,
            stats,
        } = &mut *guard;

        if faults.fail_receives > 0 {
            faults.fail_receives -= 1;
            stats.injected_failures += 1;
            return Err(EnvError::channel("injected receive failure"));
        }
        let queue = queues.get_mut(channel).ok_or_else(|| EnvError::no_channel(channel))?;

        // only the head of each group is eligible, and only when visible
        let mut heads = BTreeSet::new();
        let mut candidates = Vec::new();
        for (index, message) in queue.messages.iter().enumerate() {
            if let Some(group) = &message.group {
                if !heads.insert(group.as_str()) {
                    continue;
                }
            }
            if message.visible_at <= now {
                candidates.push(index);
            }
        }
        if faults.shuffle {
            candidates.shuffle(rng);
        }
        candidates.truncate(max);

        let mut delivered = Vec::with_capacity(candidates.len());
        for index in candidates {
            let message = &mut queue.messages[index];
            if message.receive_count > 0 {
                stats.redelivered += 1;
            }
            let handle = ReceiptHandle::new();
            message.receive_count += 1;
            message.handle = Some(handle.clone());
            message.visible_at = now + self.visibility_timeout;
            stats.delivered += 1;

            delivered.push(ReceivedMessage {
                id: message.id,
                payload: message.payload.clone(),
                handle,
                receive_count: message.receive_count,
            });
        }
        Ok(delivered)
    }
}

#[async_trait]
impl<C: TrafficContext> MessageChannel for InMemoryChannel<C> {
    async fn publish(&self, channel: &str, message: OutgoingMessage) -> Result<MessageId, EnvError> {
        let now = self.context.now();
        let mut state = self.state.lock().await;
        state.take_injected_publish_failure()?;
        state.enqueue(channel, message, now, self.dedup_window)
    }

    async fn publish_chunk(
        &self,
        channel: &str,
        messages: Vec<OutgoingMessage>,
    ) -> Result<Vec<MessageId>, EnvError> {
        if messages.len() > self.batch_limit {
            return Err(EnvError::BatchTooLarge {
                size: messages.len(),
                limit: self.batch_limit,
            });
        }
        let now = self.context.now();
        let mut state = self.state.lock().await;
        state.take_injected_publish_failure()?;
        if !state.queues.contains_key(channel) {
            return Err(EnvError::no_channel(channel));
        }
        messages
            .into_iter()
            .map(|message| state.enqueue(channel, message, now, self.dedup_window))
            .collect()
    }

    /// Returns what is visible now; when nothing is, waits `wait` on the
    /// context clock and looks once more.
    async fn receive(
        &self,
        channel: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, EnvError> {
        let first = self.take_visible(channel, max_messages).await?;
        if !first.is_empty() || wait.is_zero() {
            return Ok(first);
        }
        self.context.sleep(wait).await;
        self.take_visible(channel, max_messages).await
    }

    async fn delete(&self, channel: &str, handle: &ReceiptHandle) -> Result<(), EnvError> {
        let mut guard = self.state.lock().await;
        let BrokerState { queues, stats, .. } = &mut *guard;
        let queue = queues.get_mut(channel).ok_or_else(|| EnvError::no_channel(channel))?;

        match queue.messages.iter().position(|m| m.handle.as_ref() == Some(handle)) {
            Some(index) => {
                queue.messages.remove(index);
                stats.deleted += 1;
            }
            None => stats.stale_deletes += 1,
        }
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.batch_limit
    }
}

/// Fault injection handle shared with an [`InMemoryChannel`].
#[derive(Clone)]
pub struct BrokerController {
    state: Arc<Mutex<BrokerState>>,
}

impl BrokerController {
    pub async fn set_duplicate_probability(&self, probability: f64) {
        self.state.lock().await.faults.duplicate_probability = probability.clamp(0.0, 1.0);
    }

    pub async fn set_shuffle(&self, shuffle: bool) {
        self.state.lock().await.faults.shuffle = shuffle;
    }

    /// Delays delivery of messages published to `channel` from now on.
    pub async fn set_delivery_delay(&self, channel: &str, delay: Duration) {
        let mut state = self.state.lock().await;
        if delay.is_zero() {
            state.faults.delivery_delay.remove(channel);
        } else {
            state.faults.delivery_delay.insert(channel.to_string(), delay);
        }
    }

    pub async fn fail_next_receives(&self, count: u32) {
        self.state.lock().await.faults.fail_receives = count;
    }

    pub async fn fail_next_publishes(&self, count: u32) {
        self.state.lock().await.faults.fail_publishes = count;
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults = Faults::default();
    }

    pub async fn faults(&self) -> Faults {
        self.state.lock().await.faults.clone()
    }

    /// Stores raw bytes on `channel`, visible at once and untouched by faults.
    pub async fn inject_raw(&self, channel: &str, payload: Vec<u8>) -> Result<MessageId, EnvError> {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .get_mut(channel)
            .ok_or_else(|| EnvError::no_channel(channel))?;
        let id = MessageId::new();
        queue
            .messages
            .push_back(stored(id, OutgoingMessage::new(payload), Duration::ZERO));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;

    const Q: &str = "q";

    fn broker() -> (Arc<SimContext>, InMemoryChannel<SimContext>) {
        let ctx = SimContext::shared(7);
        let channel = InMemoryChannel::new(ctx.clone(), 7, [Q]);
        (ctx, channel)
    }

    fn msg(text: &str) -> OutgoingMessage {
        OutgoingMessage::new(text.as_bytes().to_vec())
    }

    async fn recv(channel: &InMemoryChannel<SimContext>, max: usize) -> Vec<ReceivedMessage> {
        channel.receive(Q, max, Duration::ZERO).await.unwrap()
    }

    #[tokio::test]
    async fn test_publish_receive_delete() {
        let (_, channel) = broker();
        channel.publish(Q, msg("a")).await.unwrap();

        let got = recv(&channel, 10).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, b"a");
        assert_eq!(got[0].receive_count, 1);
        assert!(recv(&channel, 10).await.is_empty(), "in flight is hidden");

        channel.delete(Q, &got[0].handle).await.unwrap();
        assert_eq!(channel.depth(Q).await, 0);
    }

    #[tokio::test]
    async fn test_double_delete_is_harmless() {
        let (_, channel) = broker();
        channel.publish(Q, msg("a")).await.unwrap();
        let got = recv(&channel, 1).await;

        channel.delete(Q, &got[0].handle).await.unwrap();
        channel.delete(Q, &got[0].handle).await.unwrap();
        channel.delete(Q, &ReceiptHandle::new()).await.unwrap();

        let stats = channel.stats().await;
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.stale_deletes, 2);
    }

    #[tokio::test]
    async fn test_redelivery_after_visibility_timeout() {
        let (ctx, channel) = broker();
        let channel = channel.with_visibility_timeout(Duration::from_secs(5));
        channel.publish(Q, msg("a")).await.unwrap();

        let first = recv(&channel, 1).await;
        ctx.advance_time(Duration::from_secs(5));
        let second = recv(&channel, 1).await;

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].handle, first[0].handle);

        // the first handle is spent
        channel.delete(Q, &first[0].handle).await.unwrap();
        assert_eq!(channel.depth(Q).await, 1);
        channel.delete(Q, &second[0].handle).await.unwrap();
        assert_eq!(channel.depth(Q).await, 0);
    }

    #[tokio::test]
    async fn test_group_delivers_head_only() {
        let (_, channel) = broker();
        channel.publish(Q, OutgoingMessage::grouped(b"1".to_vec(), "g")).await.unwrap();
        channel.publish(Q, OutgoingMessage::grouped(b"2".to_vec(), "g")).await.unwrap();
        channel.publish(Q, msg("free")).await.unwrap();

        let got = recv(&channel, 10).await;
        let payloads: Vec<&[u8]> = got.iter().map(|m| m.payload.as_slice()).collect();
        assert_eq!(payloads, vec![b"1".as_slice(), b"free".as_slice()]);
        assert!(recv(&channel, 10).await.is_empty());

        channel.delete(Q, &got[0].handle).await.unwrap();
        let next = recv(&channel, 10).await;
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].payload, b"2");
    }

    #[tokio::test]
    async fn test_grouped_content_is_deduplicated() {
        let (_, channel) = broker();
        let a = channel.publish(Q, OutgoingMessage::grouped(b"x".to_vec(), "g")).await.unwrap();
        let b = channel.publish(Q, OutgoingMessage::grouped(b"x".to_vec(), "g")).await.unwrap();
        channel.publish(Q, OutgoingMessage::grouped(b"x".to_vec(), "h")).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(channel.depth(Q).await, 2);
        assert_eq!(channel.stats().await.deduplicated, 1);
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let (_, channel) = broker();
        let eleven: Vec<_> = (0..11).map(|i| msg(&i.to_string())).collect();
        let err = channel.publish_chunk(Q, eleven).await.unwrap_err();
        assert!(matches!(err, EnvError::BatchTooLarge { size: 11, limit: 10 }));

        let many: Vec<_> = (0..25).map(|i| msg(&i.to_string())).collect();
        let report = channel.publish_batch(Q, many).await;
        assert_eq!(report.chunks, 3);
        assert_eq!(report.sent, 25);
        assert_eq!(channel.depth(Q).await, 25);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_block_others() {
        let (_, channel) = broker();
        channel.controller().fail_next_publishes(1).await;

        let many: Vec<_> = (0..25).map(|i| msg(&i.to_string())).collect();
        let report = channel.publish_batch(Q, many).await;

        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(report.failed_chunks[0].chunk_index, 0);
        assert_eq!(report.sent, 15);
        assert_eq!(channel.depth(Q).await, 15);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_fault() {
        let (_, channel) = broker();
        channel.controller().set_duplicate_probability(1.0).await;
        channel.publish(Q, msg("a")).await.unwrap();

        let got = recv(&channel, 10).await;
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|m| m.payload == b"a"));
    }

    #[tokio::test]
    async fn test_delivery_delay_fault() {
        let (ctx, channel) = broker();
        channel.controller().set_delivery_delay(Q, Duration::from_secs(2)).await;
        channel.publish(Q, msg("late")).await.unwrap();

        assert!(recv(&channel, 10).await.is_empty());
        ctx.advance_time(Duration::from_secs(2));
        assert_eq!(recv(&channel, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_receive_failure_and_long_poll() {
        let (ctx, channel) = broker();
        channel.controller().fail_next_receives(1).await;
        assert!(channel.receive(Q, 10, Duration::ZERO).await.is_err());

        let got = channel.receive(Q, 10, Duration::from_millis(200)).await.unwrap();
        assert!(got.is_empty());
        assert_eq!(ctx.now(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_inject_raw_and_unknown_channel() {
        let (_, channel) = broker();
        channel.controller().inject_raw(Q, b"{not json".to_vec()).await.unwrap();
        assert_eq!(recv(&channel, 10).await[0].payload, b"{not json");

        let err = channel.publish("nope", msg("a")).await.unwrap_err();
        assert!(matches!(err, EnvError::ChannelNotFound(_)));
    }
}
