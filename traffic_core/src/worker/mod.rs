//! Worker runtime - consume ticks, recompute a partition, emit deltas.
//!
//! Both workers share this loop and differ only in the [`Partition`] they
//! own:
//!
//! ```text
//! Unbootstrapped --bootstrap--> Idle --TickEvent--> Processing --emit--> Idle
//!        |                        ^                                       |
//!        +-- ticks dropped        +---------------------------------------+
//! ```
//!
//! Recompute is `&mut self`, so a worker never has two recomputes in
//! flight; the next tick is only taken once the previous batch was emitted.

mod mobility;
mod signal;

pub use mobility::MobilityPartition;
pub use signal::SignalPartition;

use crate::backoff::Backoff;
use crate::bundle::{Bundle, BundleRef, SliceName};
use crate::config::{ChannelNames, SimulationConfig};
use crate::error::BootstrapError;
use crate::events::{ControlEvent, Decoded, DeltaEvent, UpdateEvent};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use traffic_env::{BlobStore, MessageChannel, OutgoingMessage, TrafficContext};

/// Which partition a worker owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Mobility,
    Signal,
}

impl WorkerRole {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRole::Mobility => "mobility",
            WorkerRole::Signal => "signal",
        }
    }

    /// Tick channel this role consumes.
    pub fn tick_channel<'a>(&self, channels: &'a ChannelNames) -> &'a str {
        match self {
            WorkerRole::Mobility => &channels.mobility_ticks,
            WorkerRole::Signal => &channels.signal_ticks,
        }
    }

    /// Entropy stream id, kept apart per role.
    fn stream(&self) -> u64 {
        match self {
            WorkerRole::Mobility => 1 << 56,
            WorkerRole::Signal => 2 << 56,
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a worker. There is no terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// No bundle loaded yet; ticks are dropped
    Unbootstrapped,
    /// Bootstrapped and waiting for a tick
    Idle,
    /// Recomputing and emitting a tick's batch
    Processing,
}

/// The mutable state a worker owns exclusively.
pub trait Partition: Send + Sync + Sized + 'static {
    fn role() -> WorkerRole;

    /// Bundle slices needed to build the partition.
    fn required_slices() -> &'static [SliceName];

    fn from_bundle(bundle: Bundle, config: &SimulationConfig) -> Result<Self, BootstrapError>;

    /// Advances the partition one tick and returns the resulting deltas.
    ///
    /// Must depend only on the owned state and `rng`; the caller seeds `rng`
    /// from the tick number.
    fn recompute(&mut self, tick: u64, rng: &mut ChaCha8Rng) -> Vec<DeltaEvent>;

    /// One-line summary for the bootstrap log.
    fn describe(&self) -> String;
}

/// Deltas computed for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBatch {
    pub tick: u64,
    pub deltas: Vec<DeltaEvent>,
}

impl DeltaBatch {
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Outcome of one `emit` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub sent: usize,
    pub failed: usize,
    pub unencodable: usize,
}

/// Outcome of one `poll_and_dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: usize,
    pub ticks_processed: usize,
    /// Redelivered ticks answered from the cached batch
    pub duplicates: usize,
    /// Ticks older than the last processed one (processed anyway)
    pub late_ticks: usize,
    pub dropped_uninitialized: usize,
    pub unknown: usize,
    pub poison: usize,
    pub delete_failures: usize,
    pub receive_failed: bool,
    pub emitted: EmitReport,
}

/// A worker process, generic over its partition and environment.
pub struct Worker<P, Ctx, Ch, St>
where
    P: Partition,
    Ctx: TrafficContext,
    Ch: MessageChannel,
    St: BlobStore,
{
    context: Arc<Ctx>,
    channel: Arc<Ch>,
    store: Arc<St>,
    config: SimulationConfig,

    partition: Option<P>,
    phase: WorkerPhase,

    /// Newest tick recomputed and the batch it produced
    last_tick: Option<u64>,
    last_batch: Option<DeltaBatch>,

    backoff: Backoff,
}

impl<P, Ctx, Ch, St> Worker<P, Ctx, Ch, St>
where
    P: Partition,
    Ctx: TrafficContext,
    Ch: MessageChannel,
    St: BlobStore,
{
    pub fn new(context: Arc<Ctx>, channel: Arc<Ch>, store: Arc<St>, config: SimulationConfig) -> Self {
        let backoff = Backoff::new(&config.backoff);
        Self {
            context,
            channel,
            store,
            config,
            partition: None,
            phase: WorkerPhase::Unbootstrapped,
            last_tick: None,
            last_batch: None,
            backoff,
        }
    }

    pub fn role(&self) -> WorkerRole {
        P::role()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn is_initialized(&self) -> bool {
        self.phase != WorkerPhase::Unbootstrapped
    }

    pub fn partition(&self) -> Option<&P> {
        self.partition.as_ref()
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    fn tick_channel(&self) -> &str {
        P::role().tick_channel(&self.config.channels)
    }

    /// Bootstraps from the configured bundle.
    pub async fn bootstrap(&mut self) -> Result<(), BootstrapError> {
        let bundle = self.config.bundle.clone().ok_or(BootstrapError::NoBundle)?;
        self.bootstrap_from(&bundle).await
    }

    /// Loads the partition from `bundle`. Fatal on failure.
    pub async fn bootstrap_from(&mut self, bundle: &BundleRef) -> Result<(), BootstrapError> {
        let loaded = Bundle::load(
            self.store.as_ref(),
            bundle,
            P::required_slices(),
            &self.config.bundle_defaults(),
        )
        .await?;
        let partition = P::from_bundle(loaded, &self.config)?;

        info!("[{}] bootstrapped: {}", P::role(), partition.describe());
        self.partition = Some(partition);
        self.phase = WorkerPhase::Idle;
        Ok(())
    }

    /// Recomputes the partition for `tick`. `None` until bootstrapped.
    pub fn recompute(&mut self, tick: u64) -> Option<DeltaBatch> {
        let partition = self.partition.as_mut()?;
        let seed = self.context.derive_seed(P::role().stream() ^ tick);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let deltas = partition.recompute(tick, &mut rng);
        Some(DeltaBatch { tick, deltas })
    }

    /// Publishes a batch, one message per delta, in channel-sized chunks.
    pub async fn emit(&self, batch: &DeltaBatch) -> EmitReport {
        let mut report = EmitReport::default();
        let group = self.config.ordered_updates.then(|| P::role().name().to_string());

        let mut messages = Vec::with_capacity(batch.len());
        for delta in &batch.deltas {
            match UpdateEvent::new(batch.tick, delta.clone()).encode() {
                Ok(payload) => messages.push(OutgoingMessage {
                    payload,
                    group: group.clone(),
                }),
                Err(e) => {
                    warn!("[{}] could not encode {} delta: {}", P::role(), delta.kind(), e);
                    report.unencodable += 1;
                }
            }
        }

        let result = self
            .channel
            .publish_batch(&self.config.channels.updates, messages)
            .await;
        for failure in &result.failed_chunks {
            warn!(
                "[{}] tick {}: chunk {} ({} deltas) not published: {}",
                P::role(),
                batch.tick,
                failure.chunk_index,
                failure.messages,
                failure.error
            );
        }
        report.sent = result.sent;
        report.failed = result.failed();
        report
    }

    /// Handles one tick: recompute (or replay a duplicate) and emit.
    async fn handle_tick(&mut self, tick: u64, report: &mut PollReport) {
        if self.last_tick == Some(tick) {
            if let Some(batch) = self.last_batch.clone() {
                debug!("[{}] duplicate tick {}, re-emitting cached batch", P::role(), tick);
                report.duplicates += 1;
                let emitted = self.emit(&batch).await;
                accumulate(&mut report.emitted, emitted);
                return;
            }
        }
        let late = self.last_tick.is_some_and(|last| tick < last);
        if late {
            // accepted eventual-consistency gap: a late tick is still processed
            warn!("[{}] late tick {} after {:?}, processing anyway", P::role(), tick, self.last_tick);
            report.late_ticks += 1;
        }

        self.phase = WorkerPhase::Processing;
        let Some(batch) = self.recompute(tick) else {
            return;
        };
        let emitted = self.emit(&batch).await;
        debug!(
            "[{}] tick {}: {} deltas, {} sent, {} failed",
            P::role(),
            tick,
            batch.len(),
            emitted.sent,
            emitted.failed
        );
        accumulate(&mut report.emitted, emitted);
        report.ticks_processed += 1;

        // the cache tracks the newest tick so its redelivery still replays
        if !late {
            self.last_tick = Some(tick);
            self.last_batch = Some(batch);
        }
        self.phase = WorkerPhase::Idle;
    }

    /// Long-polls the tick channel once and dispatches what arrived.
    ///
    /// Every received message is deleted after dispatch, whatever its fate.
    /// Only a failed bootstrap from an `Initialize` event is returned as an
    /// error.
    pub async fn poll_and_dispatch(&mut self) -> Result<PollReport, BootstrapError> {
        let mut report = PollReport::default();
        let channel = self.tick_channel().to_string();

        let messages = match self
            .channel
            .receive(&channel, self.config.max_messages_per_poll, self.config.wait_time_per_poll())
            .await
        {
            Ok(messages) => {
                self.backoff.reset();
                messages
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!("[{}] receive on {} failed: {} (retry in {:?})", P::role(), channel, e, delay);
                report.receive_failed = true;
                self.context.sleep(delay).await;
                return Ok(report);
            }
        };
        report.received = messages.len();

        for message in messages {
            let outcome = match ControlEvent::decode(&message.payload) {
                Ok(Decoded::Known(ControlEvent::Tick(tick))) => {
                    if self.is_initialized() {
                        self.handle_tick(tick.tick_number, &mut report).await;
                    } else {
                        warn!("[{}] not bootstrapped, dropping tick {}", P::role(), tick.tick_number);
                        report.dropped_uninitialized += 1;
                    }
                    Ok(())
                }
                Ok(Decoded::Known(ControlEvent::Initialize { bundle })) => {
                    if self.is_initialized() {
                        debug!("[{}] already bootstrapped, ignoring Initialize", P::role());
                        Ok(())
                    } else {
                        self.bootstrap_from(&bundle).await
                    }
                }
                Ok(Decoded::Unknown(kind)) => {
                    warn!("[{}] unhandled event type: {}", P::role(), kind);
                    report.unknown += 1;
                    Ok(())
                }
                Err(e) => {
                    warn!("[{}] discarding poison message {}: {} | {}", P::role(), message.id, e, message.payload_lossy());
                    report.poison += 1;
                    Ok(())
                }
            };

            if let Err(e) = self.channel.delete(&channel, &message.handle).await {
                warn!("[{}] failed to delete message {}: {}", P::role(), message.id, e);
                report.delete_failures += 1;
            }
            outcome?;
        }

        Ok(report)
    }

    /// Runs until `shutdown` flips to true.
    ///
    /// Bootstraps first when the configuration carries a bundle; otherwise
    /// waits for an `Initialize` event on the tick channel.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), BootstrapError> {
        if self.config.bundle.is_some() && !self.is_initialized() {
            self.bootstrap().await?;
        } else if !self.is_initialized() {
            info!("[{}] no bundle configured, waiting for Initialize", P::role());
        }

        while !*shutdown.borrow() {
            let report = self.poll_and_dispatch().await?;
            if report.received == 0 && !report.receive_failed {
                self.context.sleep(self.config.idle_sleep()).await;
            }
        }

        info!("[{}] shutdown requested, stopping after tick {:?}", P::role(), self.last_tick);
        Ok(())
    }
}

fn accumulate(total: &mut EmitReport, more: EmitReport) {
    total.sent += more.sent;
    total.failed += more.failed;
    total.unencodable += more.unencodable;
}
