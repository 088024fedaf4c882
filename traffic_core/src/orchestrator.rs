//! Tick driver and aggregator.
//!
//! The orchestrator is the only writer of the canonical [`WorldState`]. Each
//! tick it fans a `TickEvent` out to every worker's tick channel, waits a
//! settle interval, drains the update channel into the world state and
//! exports a full snapshot.
//!
//! ```text
//! publish_tick(N) --> settle --> collect_tick(N) --> export --> N + 1
//!                                 |
//!                                 +-- receive / decode / merge / delete
//! ```
//!
//! The settle interval is a scheduling heuristic, not a barrier: deltas for
//! tick N may land in the drain for N + 1. Those late deltas are applied
//! (last-write-wins) and counted unless `reject_stale_deltas` is set.

use crate::backoff::Backoff;
use crate::bundle::{Bundle, SliceName};
use crate::config::SimulationConfig;
use crate::error::BootstrapError;
use crate::events::{ControlEvent, Decoded, StateExported, TickEvent, UpdateEvent};
use crate::model::WorldState;
use crate::snapshot::Snapshot;

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use traffic_env::{BlobRef, BlobStore, MessageChannel, OutgoingMessage, TrafficContext};

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Tick channels the `TickEvent` could not be published to
    pub publish_failures: usize,
    pub received: usize,
    pub applied: usize,
    /// Deltas refused by the merge (unknown entity, invalid value)
    pub rejected: usize,
    pub poison: usize,
    pub unknown: usize,
    /// Deltas stamped with an earlier tick
    pub late: usize,
    /// Late deltas discarded by the staleness guard
    pub stale_discarded: usize,
    pub delete_failures: usize,
    pub receive_failures: usize,
    /// Location of the versioned snapshot, if the export succeeded
    pub exported: Option<BlobRef>,
}

/// Owns the world state and drives the tick clock.
pub struct Orchestrator<Ctx, Ch, St>
where
    Ctx: TrafficContext,
    Ch: MessageChannel,
    St: BlobStore,
{
    context: Arc<Ctx>,
    channel: Arc<Ch>,
    store: Arc<St>,
    config: SimulationConfig,

    world: WorldState,
    bootstrapped: bool,

    /// Tick being published or collected
    tick: u64,
    /// Report of the tick in progress
    pending: TickReport,

    backoff: Backoff,
}

impl<Ctx, Ch, St> Orchestrator<Ctx, Ch, St>
where
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
            world: WorldState::default(),
            bootstrapped: false,
            tick: 0,
            pending: TickReport::default(),
            backoff,
        }
    }

    pub fn state(&self) -> &WorldState {
        &self.world
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Last tick published (0 before the first tick).
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Loads every bundle slice into the world state, then announces the
    /// bundle on each tick channel for workers started without one.
    ///
    /// Fatal on any missing or undecodable slice.
    pub async fn bootstrap(&mut self) -> Result<&WorldState, BootstrapError> {
        let bundle_ref = self.config.bundle.clone().ok_or(BootstrapError::NoBundle)?;
        let bundle = Bundle::load(
            self.store.as_ref(),
            &bundle_ref,
            &SliceName::all(),
            &self.config.bundle_defaults(),
        )
        .await?;

        self.world = bundle.into_world_state();
        self.bootstrapped = true;
        info!(
            "Orchestrator bootstrapped: {} roads, {} intersections, {} vehicles (seed={})",
            self.world.roads.len(),
            self.world.intersections.len(),
            self.world.vehicles.len(),
            self.context.seed()
        );

        match (ControlEvent::Initialize { bundle: bundle_ref }).encode() {
            Ok(payload) => {
                for channel in self.config.channels.tick_channels() {
                    let message = OutgoingMessage::new(payload.clone());
                    if let Err(e) = self.channel.publish(channel, message).await {
                        warn!("Failed to announce bundle on {}: {}", channel, e);
                    }
                }
            }
            Err(e) => warn!("Failed to encode Initialize: {}", e),
        }

        Ok(&self.world)
    }

    /// Publishes the next `TickEvent` on every tick channel and returns its
    /// number.
    ///
    /// Publish failures are transient: they are logged and counted in the
    /// tick's report, and the tick proceeds.
    pub async fn publish_tick(&mut self) -> u64 {
        self.tick += 1;
        self.pending = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let event = ControlEvent::Tick(TickEvent {
            tick_number: self.tick,
        });
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode tick {}: {}", self.tick, e);
                self.pending.publish_failures = self.config.channels.tick_channels().len();
                return self.tick;
            }
        };

        for channel in self.config.channels.tick_channels() {
            if let Err(e) = self
                .channel
                .publish(channel, OutgoingMessage::new(payload.clone()))
                .await
            {
                warn!("Failed to publish tick {} on {}: {}", self.tick, channel, e);
                self.pending.publish_failures += 1;
            }
        }
        debug!("Published tick {}", self.tick);
        self.tick
    }

    /// Drains the update channel into the world state, exports the snapshot
    /// for the current tick and returns the tick's report.
    pub async fn collect_tick(&mut self) -> TickReport {
        let channel = self.config.channels.updates.clone();

        for _ in 0..self.config.max_polls_per_drain.max(1) {
            let messages = match self
                .channel
                .receive(&channel, self.config.max_messages_per_poll, self.config.wait_time_per_poll())
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("Receive on {} failed: {}", channel, e);
                    self.pending.receive_failures += 1;
                    break;
                }
            };
            if messages.is_empty() {
                break;
            }
            self.pending.received += messages.len();

            for message in messages {
                match UpdateEvent::decode(&message.payload) {
                    Ok(Decoded::Known(update)) => self.merge(update),
                    Ok(Decoded::Unknown(kind)) => {
                        warn!("Unhandled update type: {}", kind);
                        self.pending.unknown += 1;
                    }
                    Err(e) => {
                        warn!("Discarding poison update {}: {} | {}", message.id, e, message.payload_lossy());
                        self.pending.poison += 1;
                    }
                }
                if let Err(e) = self.channel.delete(&channel, &message.handle).await {
                    warn!("Failed to delete update {}: {}", message.id, e);
                    self.pending.delete_failures += 1;
                }
            }
        }

        self.world.advance_to(self.tick);
        self.pending.exported = self.export_snapshot().await;

        let report = std::mem::take(&mut self.pending);
        info!(
            "Tick {}: {} received, {} applied, {} rejected, {} late, {} poison",
            report.tick, report.received, report.applied, report.rejected, report.late, report.poison
        );
        report
    }

    fn merge(&mut self, update: UpdateEvent) {
        if let Some(tick) = update.tick.filter(|t| *t < self.tick) {
            self.pending.late += 1;
            if self.config.reject_stale_deltas {
                debug!("Discarding {} from tick {} (current {})", update.delta.kind(), tick, self.tick);
                self.pending.stale_discarded += 1;
                return;
            }
            debug!("Applying late {} from tick {} (current {})", update.delta.kind(), tick, self.tick);
        }

        match self.world.apply(&update.delta) {
            Ok(()) => self.pending.applied += 1,
            Err(e) => {
                warn!("Rejected {} for {}: {}", update.delta.kind(), update.delta.entity_key(), e);
                self.pending.rejected += 1;
            }
        }
    }

    /// Writes the current world state as a versioned and a latest snapshot.
    ///
    /// Returns the versioned location, or `None` if the write failed.
    pub async fn export_snapshot(&self) -> Option<BlobRef> {
        let snapshot = self.world.snapshot();
        let bytes = match snapshot.to_json() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode snapshot for tick {}: {}", snapshot.tick, e);
                return None;
            }
        };

        let prefix = &self.config.snapshot_prefix;
        let location = match self
            .store
            .put(&Snapshot::blob_name(prefix, snapshot.tick), bytes.clone())
            .await
        {
            Ok(location) => location,
            Err(e) => {
                warn!("Failed to export snapshot for tick {}: {}", snapshot.tick, e);
                return None;
            }
        };
        if let Err(e) = self.store.put(&Snapshot::latest_name(prefix), bytes).await {
            warn!("Failed to update latest snapshot: {}", e);
        }

        if let Some(feed) = &self.config.channels.snapshots {
            let event = StateExported {
                tick_number: snapshot.tick,
                location: location.clone(),
            };
            match event.encode() {
                Ok(payload) => {
                    if let Err(e) = self.channel.publish(feed, OutgoingMessage::new(payload)).await {
                        warn!("Failed to announce snapshot on {}: {}", feed, e);
                    }
                }
                Err(e) => warn!("Failed to encode StateExported: {}", e),
            }
        }

        Some(location)
    }

    /// One full tick: publish, settle, collect.
    pub async fn run_tick(&mut self) -> TickReport {
        self.publish_tick().await;
        self.context.sleep(self.config.settle_interval()).await;
        self.collect_tick().await
    }

    /// Runs ticks until `shutdown` flips to true or `max_ticks` ticks ran.
    ///
    /// Shutdown is only observed between ticks; an in-flight merge and export
    /// always completes. Returns the number of ticks run.
    pub async fn run_tick_loop(
        &mut self,
        shutdown: watch::Receiver<bool>,
        max_ticks: Option<u64>,
    ) -> Result<u64, BootstrapError> {
        if !self.bootstrapped {
            self.bootstrap().await?;
        }

        let mut ticks = 0;
        while !*shutdown.borrow() && max_ticks.map_or(true, |max| ticks < max) {
            let started = self.context.now();
            let report = self.run_tick().await;
            ticks += 1;

            if report.receive_failures > 0 || report.publish_failures > 0 {
                let delay = self.backoff.next_delay();
                warn!("Channel trouble in tick {}, backing off {:?}", report.tick, delay);
                self.context.sleep(delay).await;
            } else {
                self.backoff.reset();
            }

            let elapsed = self.context.now().saturating_sub(started);
            if let Some(remaining) = self.config.tick_interval().checked_sub(elapsed) {
                self.context.sleep(remaining).await;
            }
        }

        info!("Tick loop stopped after {} ticks (at tick {})", ticks, self.tick);
        Ok(ticks)
    }
}
