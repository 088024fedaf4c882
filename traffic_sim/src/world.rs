//! SimWorld - lock-step harness for the orchestrator and both workers.
//!
//! Every tick runs the processes in a fixed order on one virtual clock:
//!
//! ```text
//! orchestrator.publish_tick -> mobility.poll -> signal.poll
//!     -> settle -> orchestrator.collect_tick -> sleep to tick boundary
//! ```
//!
//! Given the same seed and faults, two runs produce the same snapshots.

use crate::broker::{BrokerController, InMemoryChannel};
use crate::context::SimContext;
use crate::fixtures::Topology;
use crate::store::MemoryBlobStore;

use std::sync::Arc;
use tracing::debug;
use traffic_core::{
    BootstrapError, BundleRef, CoreError, MobilityPartition, Orchestrator, PollReport,
    SignalPartition, SimulationConfig, Snapshot, TickReport, Worker,
};
use traffic_env::TrafficContext;

pub type SimChannel = InMemoryChannel<SimContext>;
pub type SimOrchestrator = Orchestrator<SimContext, SimChannel, MemoryBlobStore>;
pub type SimWorker<P> = Worker<P, SimContext, SimChannel, MemoryBlobStore>;

/// Outcome of one lock-step tick.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub tick: TickReport,
    pub mobility: PollReport,
    pub signal: PollReport,
}

/// The SimWorld - one orchestrator, one mobility worker, one signal worker.
pub struct SimWorld {
    pub config: SimulationConfig,
    pub context: Arc<SimContext>,
    pub channel: Arc<SimChannel>,
    pub store: Arc<MemoryBlobStore>,

    pub orchestrator: SimOrchestrator,
    pub mobility: SimWorker<MobilityPartition>,
    pub signal: SimWorker<SignalPartition>,

    bundle: BundleRef,
    workers_know_bundle: bool,
    tick_count: u64,
}

impl SimWorld {
    /// Uploads `topology` and wires all three processes to it.
    pub async fn new(seed: u64, topology: &Topology, config: SimulationConfig) -> Result<Self, CoreError> {
        Self::build(seed, topology, config, true).await
    }

    /// Like [`SimWorld::new`], but the workers get no bundle and must wait
    /// for the orchestrator's `Initialize` announcement.
    pub async fn cold(seed: u64, topology: &Topology, config: SimulationConfig) -> Result<Self, CoreError> {
        Self::build(seed, topology, config, false).await
    }

    async fn build(
        seed: u64,
        topology: &Topology,
        mut config: SimulationConfig,
        workers_know_bundle: bool,
    ) -> Result<Self, CoreError> {
        config.seed = Some(seed);

        let context = SimContext::shared(seed);
        let store = MemoryBlobStore::shared();
        let mut channels: Vec<String> = config
            .channels
            .tick_channels()
            .iter()
            .map(|c| c.to_string())
            .collect();
        channels.push(config.channels.updates.clone());
        channels.extend(config.channels.snapshots.clone());
        let channel = Arc::new(InMemoryChannel::new(context.clone(), seed, channels));

        let bundle = topology.upload(store.as_ref(), "bundle").await?;
        config.bundle = Some(bundle.clone());

        let mut worker_config = config.clone();
        if !workers_know_bundle {
            worker_config.bundle = None;
        }

        Ok(Self {
            orchestrator: Orchestrator::new(context.clone(), channel.clone(), store.clone(), config.clone()),
            mobility: Worker::new(context.clone(), channel.clone(), store.clone(), worker_config.clone()),
            signal: Worker::new(context.clone(), channel.clone(), store.clone(), worker_config),
            config,
            context,
            channel,
            store,
            bundle,
            workers_know_bundle,
            tick_count: 0,
        })
    }

    /// Bootstraps the orchestrator, and the workers when they have a bundle.
    pub async fn bootstrap(&mut self) -> Result<(), BootstrapError> {
        self.orchestrator.bootstrap().await?;
        if self.workers_know_bundle {
            self.mobility.bootstrap().await?;
            self.signal.bootstrap().await?;
        }
        Ok(())
    }

    pub fn controller(&self) -> BrokerController {
        self.channel.controller()
    }

    pub fn bundle(&self) -> &BundleRef {
        &self.bundle
    }

    /// Runs one tick in lock step.
    pub async fn step(&mut self) -> Result<StepReport, BootstrapError> {
        let started = self.context.now();

        self.orchestrator.publish_tick().await;
        let mobility = self.mobility.poll_and_dispatch().await?;
        let signal = self.signal.poll_and_dispatch().await?;
        self.context.sleep(self.config.settle_interval()).await;
        let tick = self.orchestrator.collect_tick().await;

        let elapsed = self.context.now().saturating_sub(started);
        if let Some(remaining) = self.config.tick_interval().checked_sub(elapsed) {
            self.context.sleep(remaining).await;
        }
        self.tick_count += 1;
        debug!(
            "Step {}: mobility took {} ticks, signal took {}, orchestrator applied {}",
            tick.tick, mobility.ticks_processed, signal.ticks_processed, tick.applied
        );

        Ok(StepReport { tick, mobility, signal })
    }

    /// Runs `ticks` steps and returns their reports.
    pub async fn run(&mut self, ticks: u64) -> Result<Vec<StepReport>, BootstrapError> {
        let mut reports = Vec::with_capacity(ticks as usize);
        for _ in 0..ticks {
            reports.push(self.step().await?);
        }
        Ok(reports)
    }

    /// Current canonical world as a snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.orchestrator.state().snapshot()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use traffic_core::events::StateExported;
    use crate::runner::divergence;
    use traffic_core::{
        ControlEvent, Decoded, DeltaEvent, RoadId, SliceName, TickEvent, UpdateEvent, VehicleId,
    };
    use traffic_env::{BlobRef, BlobStore, MessageChannel, OutgoingMessage};

    async fn triangle_world(config: SimulationConfig) -> SimWorld {
        let mut world = SimWorld::new(7, &Topology::triangle(), config).await.unwrap();
        world.bootstrap().await.unwrap();
        world
    }

    fn moved(tick: u64, position: f64) -> Vec<u8> {
        UpdateEvent::new(
            tick,
            DeltaEvent::VehicleMoved {
                vehicle_id: VehicleId::new("vehicle_0"),
                road: RoadId::new("A-B"),
                position,
                speed: None,
            },
        )
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_last_write_wins_within_one_drain() {
        let mut world = triangle_world(SimulationConfig::default()).await;
        let updates = world.config.channels.updates.clone();
        let controller = world.controller();

        world.orchestrator.publish_tick().await;
        controller.inject_raw(&updates, moved(1, 5.0)).await.unwrap();
        controller.inject_raw(&updates, moved(1, 7.0)).await.unwrap();
        let report = world.orchestrator.collect_tick().await;

        assert_eq!(report.applied, 2);
        let snapshot = world.snapshot();
        let vehicle = &snapshot.vehicles[&VehicleId::new("vehicle_0")];
        assert_eq!(vehicle.position, 7.0);
        assert_eq!(vehicle.road.as_str(), "A-B");
    }

    #[tokio::test]
    async fn test_quiet_tick_repeats_previous_snapshot() {
        let mut world = triangle_world(SimulationConfig::default()).await;
        world.step().await.unwrap();
        let before = world.snapshot();

        // Workers never poll, so nothing arrives
        world.orchestrator.publish_tick().await;
        let report = world.orchestrator.collect_tick().await;
        let after = world.snapshot();

        assert_eq!(report.received, 0);
        assert_eq!(after.tick, before.tick + 1);
        assert!(after.same_entities(&before));
    }

    #[tokio::test]
    async fn test_deleting_twice_is_harmless() {
        let world = triangle_world(SimulationConfig::default()).await;
        let updates = world.config.channels.updates.clone();
        world
            .channel
            .publish(&updates, OutgoingMessage::new(moved(1, 0.5)))
            .await
            .unwrap();

        let received = world.channel.receive(&updates, 10, Duration::ZERO).await.unwrap();
        assert_eq!(received.len(), 1);
        world.channel.delete(&updates, &received[0].handle).await.unwrap();
        world.channel.delete(&updates, &received[0].handle).await.unwrap();

        assert_eq!(world.channel.depth(&updates).await, 0);
        assert_eq!(world.channel.stats().await.stale_deletes, 1);
    }

    #[tokio::test]
    async fn test_cold_workers_bootstrap_from_announcement() {
        let mut world = SimWorld::cold(7, &Topology::triangle(), SimulationConfig::default())
            .await
            .unwrap();
        world.bootstrap().await.unwrap();
        assert!(!world.mobility.is_initialized());
        assert!(!world.signal.is_initialized());

        let report = world.step().await.unwrap();
        assert!(world.mobility.is_initialized());
        assert!(world.signal.is_initialized());
        assert_eq!(report.mobility.ticks_processed, 1);
        assert_eq!(report.mobility.dropped_uninitialized, 0);
        // One move per vehicle
        assert!(report.tick.applied >= 10);
    }

    #[tokio::test]
    async fn test_snapshots_land_in_store() {
        let mut world = triangle_world(SimulationConfig::default()).await;
        let report = world.step().await.unwrap();

        assert_eq!(report.tick.exported.as_ref().map(|b| b.as_str()), Some("snapshots/tick-00000001.json"));
        let names = world.store.names("snapshots").await;
        assert_eq!(names, vec!["snapshots/latest.json", "snapshots/tick-00000001.json"]);

        let latest = world
            .store
            .get(&BlobRef::new("snapshots/latest.json"))
            .await
            .unwrap();
        assert_eq!(Snapshot::from_json(&latest).unwrap(), world.snapshot());
    }

    #[tokio::test]
    async fn test_export_is_announced_on_snapshot_feed() {
        let mut config = SimulationConfig::default();
        config.channels.snapshots = Some("state-exported".to_string());
        let mut world = triangle_world(config).await;
        world.step().await.unwrap();

        let received = world.channel.receive("state-exported", 10, Duration::ZERO).await.unwrap();
        assert_eq!(received.len(), 1);
        match StateExported::decode(&received[0].payload).unwrap() {
            Decoded::Known(event) => {
                assert_eq!(event.tick_number, 1);
                assert_eq!(event.location.as_str(), "snapshots/tick-00000001.json");
            }
            Decoded::Unknown(kind) => panic!("unexpected kind {}", kind),
        }
    }

    async fn late_update(config: SimulationConfig) -> (SimWorld, TickReport) {
        let mut world = triangle_world(config).await;
        let updates = world.config.channels.updates.clone();
        world.step().await.unwrap();

        world.orchestrator.publish_tick().await;
        world.controller().inject_raw(&updates, moved(1, 0.5)).await.unwrap();
        let report = world.orchestrator.collect_tick().await;
        (world, report)
    }

    #[tokio::test]
    async fn test_late_delta_applied_by_default() {
        let (world, report) = late_update(SimulationConfig::default()).await;
        assert_eq!((report.late, report.applied, report.stale_discarded), (1, 1, 0));
        assert_eq!(world.snapshot().vehicles[&VehicleId::new("vehicle_0")].position, 0.5);
    }

    #[tokio::test]
    async fn test_staleness_guard_discards_late_delta() {
        let config = SimulationConfig {
            reject_stale_deltas: true,
            ..SimulationConfig::default()
        };
        let (world, report) = late_update(config).await;
        assert_eq!((report.late, report.applied, report.stale_discarded), (1, 0, 1));
        assert_ne!(world.snapshot().vehicles[&VehicleId::new("vehicle_0")].position, 0.5);
    }

    #[tokio::test]
    async fn test_unknown_vehicle_is_rejected_and_acked() {
        let mut world = triangle_world(SimulationConfig::default()).await;
        let updates = world.config.channels.updates.clone();
        let stray = UpdateEvent::new(
            1,
            DeltaEvent::VehicleMoved {
                vehicle_id: VehicleId::new("vehicle_99"),
                road: RoadId::new("A-B"),
                position: 0.1,
                speed: None,
            },
        );

        world.orchestrator.publish_tick().await;
        world
            .controller()
            .inject_raw(&updates, stray.encode().unwrap())
            .await
            .unwrap();
        let report = world.orchestrator.collect_tick().await;

        assert_eq!(report.rejected, 1);
        assert_eq!(world.channel.depth(&updates).await, 0);
        assert!(!world.snapshot().vehicles.contains_key(&VehicleId::new("vehicle_99")));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_without_roads() {
        let world = SimWorld::new(7, &Topology::triangle(), SimulationConfig::default())
            .await
            .unwrap();
        let mut partial = BundleRef::new();
        for (slice, location) in world.bundle().iter() {
            if *slice != SliceName::Roads {
                partial.insert(*slice, location.clone());
            }
        }
        let config = SimulationConfig {
            bundle: Some(partial),
            ..world.config.clone()
        };

        let mut orchestrator = Orchestrator::new(world.context.clone(), world.channel.clone(), world.store.clone(), config);
        let err = orchestrator.bootstrap().await.unwrap_err();
        assert!(matches!(err, BootstrapError::MissingSlice(SliceName::Roads)));
        assert!(!orchestrator.is_bootstrapped());
    }

    #[tokio::test]
    async fn test_tick_loop_stops_at_budget_and_on_shutdown() {
        let mut world = triangle_world(SimulationConfig::default()).await;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let ran = world.orchestrator.run_tick_loop(shutdown_rx.clone(), Some(3)).await.unwrap();
        assert_eq!(ran, 3);
        assert_eq!(world.orchestrator.current_tick(), 3);
        // one tick interval per tick on the virtual clock
        assert_eq!(world.context.now(), world.config.tick_interval() * 3);

        shutdown_tx.send_replace(true);
        let ran = world.orchestrator.run_tick_loop(shutdown_rx, None).await.unwrap();
        assert_eq!(ran, 0);
        assert_eq!(world.snapshot().tick, 3);
    }

    #[tokio::test]
    async fn test_newest_tick_replays_after_a_late_one() {
        let mut world = triangle_world(SimulationConfig::default()).await;
        let ticks = world.config.channels.mobility_ticks.clone();
        let controller = world.controller();
        for tick in [5, 4, 5] {
            let payload = ControlEvent::Tick(TickEvent { tick_number: tick }).encode().unwrap();
            controller.inject_raw(&ticks, payload).await.unwrap();
        }

        let report = world.mobility.poll_and_dispatch().await.unwrap();
        assert_eq!(report.received, 3);
        assert_eq!(report.ticks_processed, 2);
        assert_eq!(report.late_ticks, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(world.mobility.last_tick(), Some(5));

        // two recomputes of 20 * 0.01, the replay moves nothing
        let mobility = world.mobility.partition().unwrap();
        let vehicle = &mobility.vehicles()[&VehicleId::new("vehicle_0")];
        assert!((vehicle.position - 0.4).abs() < 1e-9, "{}", vehicle.position);
    }

    #[tokio::test]
    async fn test_ordered_updates_converge_on_grid() {
        let config = SimulationConfig {
            ordered_updates: true,
            ..SimulationConfig::default()
        };
        let mut world = SimWorld::new(11, &Topology::grid(), config).await.unwrap();
        world.bootstrap().await.unwrap();

        for _ in 0..8 {
            let report = world.step().await.unwrap();
            assert_eq!(report.tick.late, 0);
            assert!(report.tick.applied >= 20);
            assert_eq!(divergence(&world), None);
        }
        assert_eq!(world.channel.depth(&world.config.channels.updates).await, 0);
    }
}
