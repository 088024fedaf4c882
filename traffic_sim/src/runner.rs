//! Scenario runner - executes fault scenarios on the lock-step harness.

use crate::broker::BrokerStats;
use crate::fixtures::Topology;
use crate::scenarios::ScenarioId;
use crate::world::{SimWorld, StepReport};

use tracing::{debug, info, warn};
use traffic_core::events::{ControlEvent, TickEvent};
use traffic_core::{SimulationConfig, Snapshot};
use traffic_env::TrafficContext;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Virtual time at the end of the run
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Canonical snapshot after every tick
    pub timeline: Vec<Snapshot>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioMetrics {
    /// Deltas merged by the orchestrator
    pub deltas_applied: u64,

    /// Deltas merged after their tick had passed
    pub late_deltas: u64,

    /// Deltas refused by the merge
    pub deltas_rejected: u64,

    /// Malformed messages discarded, all processes
    pub poison_discarded: u64,

    /// Unknown event types discarded, all processes
    pub unknown_discarded: u64,

    /// Ticks answered from a worker's cached batch
    pub duplicate_ticks: u64,

    /// Ticks dropped by workers not yet bootstrapped
    pub dropped_uninitialized: u64,

    /// Failed receive calls, all processes
    pub receive_failures: u64,

    /// Tick publishes that failed
    pub publish_failures: u64,

    /// Snapshots written
    pub snapshots_exported: u64,

    pub broker: BrokerStats,
}

impl ScenarioMetrics {
    fn record(&mut self, step: &StepReport) {
        let tick = &step.tick;
        self.deltas_applied += tick.applied as u64;
        self.late_deltas += tick.late as u64;
        self.deltas_rejected += tick.rejected as u64;
        self.poison_discarded += tick.poison as u64;
        self.unknown_discarded += tick.unknown as u64;
        self.receive_failures += tick.receive_failures as u64;
        self.publish_failures += tick.publish_failures as u64;
        self.snapshots_exported += tick.exported.is_some() as u64;

        for worker in [&step.mobility, &step.signal] {
            self.poison_discarded += worker.poison as u64;
            self.unknown_discarded += worker.unknown as u64;
            self.duplicate_ticks += worker.duplicates as u64;
            self.dropped_uninitialized += worker.dropped_uninitialized as u64;
            self.receive_failures += worker.receive_failed as u64;
        }
    }
}

/// Bookkeeping for one run.
#[derive(Default)]
struct Run {
    ticks: u64,
    metrics: ScenarioMetrics,
    timeline: Vec<Snapshot>,
    failures: Vec<String>,
}

impl Run {
    /// Records a step and checks the invariants that hold under every fault.
    fn observe(&mut self, world: &SimWorld, step: StepReport, expect_converged: bool) {
        self.ticks += 1;
        self.metrics.record(&step);

        let snapshot = world.snapshot();
        if snapshot.tick != step.tick.tick {
            self.fail(format!("snapshot tick {} after tick {}", snapshot.tick, step.tick.tick));
        }
        for vehicle in snapshot.vehicles.values() {
            let length = snapshot.roads.get(&vehicle.road).map_or(0.0, |r| r.length);
            if !(0.0..length).contains(&vehicle.position) {
                self.fail(format!(
                    "tick {}: {} at {} outside [0, {})",
                    snapshot.tick, vehicle.vehicle_id, vehicle.position, length
                ));
            }
        }
        if expect_converged {
            if let Some(reason) = divergence(world) {
                self.fail(format!("tick {}: {}", snapshot.tick, reason));
            }
        }
        self.timeline.push(snapshot);
    }

    fn check(&mut self, ok: bool, reason: impl FnOnce() -> String) {
        if !ok {
            self.fail(reason());
        }
    }

    fn fail(&mut self, reason: String) {
        debug!("check failed: {}", reason);
        self.failures.push(reason);
    }
}

/// Where the orchestrator's world differs from the workers' partitions.
pub fn divergence(world: &SimWorld) -> Option<String> {
    let state = world.orchestrator.state();

    if let Some(mobility) = world.mobility.partition() {
        for (id, owned) in mobility.vehicles() {
            match state.vehicles.get(id) {
                Some(seen) if seen.road == owned.road && (seen.position - owned.position).abs() < 1e-9 => {}
                seen => {
                    return Some(format!(
                        "vehicle {} is {:?} at the orchestrator, on {} at {} at the worker",
                        id,
                        seen.map(|v| (v.road.as_str(), v.position)),
                        owned.road,
                        owned.position
                    ))
                }
            }
        }
    }

    if let Some(signal) = world.signal.partition() {
        for (id, owned) in signal.lights() {
            if state.traffic_lights.get(id) != Some(&owned) {
                return Some(format!(
                    "light {} is {:?} at the orchestrator, {} at the worker",
                    id,
                    state.traffic_lights.get(id),
                    owned
                ));
            }
        }
        for (road, blocked) in &state.blockages {
            if *blocked != signal.is_blocked(road) {
                return Some(format!("road {} blocked={} at the orchestrator only", road, blocked));
            }
        }
    }
    None
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Ticks per scenario
    ticks: u64,

    topology: Topology,

    config: SimulationConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner on the triangle topology.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ticks: 20,
            topology: Topology::triangle(),
            config: SimulationConfig::default(),
        }
    }

    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks.max(2);
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!(
            "Starting scenario: {} on {} (seed={})",
            scenario.name(),
            self.topology.name,
            self.seed
        );

        let cold = scenario == ScenarioId::ColdStart;
        let mut world = match self.setup(cold).await {
            Ok(world) => world,
            Err(reason) => return self.aborted(scenario, reason),
        };

        let outcome = match scenario {
            ScenarioId::Baseline => self.run_baseline(&mut world).await,
            ScenarioId::DuplicateDelivery => self.run_duplicate_delivery(&mut world).await,
            ScenarioId::ReorderedDelivery => self.run_reordered_delivery(&mut world).await,
            ScenarioId::LateDelivery => self.run_late_delivery(&mut world).await,
            ScenarioId::PoisonMessage => self.run_poison_message(&mut world).await,
            ScenarioId::ColdStart => self.run_cold_start(&mut world).await,
            ScenarioId::TransientOutage => self.run_transient_outage(&mut world).await,
        };

        match outcome {
            Ok(mut run) => {
                run.metrics.broker = world.channel.stats().await;
                let passed = run.failures.is_empty();
                if passed {
                    info!("✓ {} complete: {} ticks, {} deltas applied", scenario, run.ticks, run.metrics.deltas_applied);
                } else {
                    warn!("✗ {} failed: {}", scenario, run.failures.join("; "));
                }
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed,
                    total_ticks: run.ticks,
                    final_time_secs: world.context.now().as_secs_f64(),
                    failure_reason: (!passed).then(|| run.failures.join("; ")),
                    metrics: run.metrics,
                    timeline: run.timeline,
                }
            }
            Err(reason) => self.aborted(scenario, reason),
        }
    }

    async fn setup(&self, cold: bool) -> Result<SimWorld, String> {
        let mut world = if cold {
            SimWorld::cold(self.seed, &self.topology, self.config.clone()).await
        } else {
            SimWorld::new(self.seed, &self.topology, self.config.clone()).await
        }
        .map_err(|e| format!("setup failed: {}", e))?;

        if !cold {
            world.bootstrap().await.map_err(|e| format!("bootstrap failed: {}", e))?;
        }
        Ok(world)
    }

    fn aborted(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        warn!("✗ {} aborted: {}", scenario, reason);
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            timeline: Vec::new(),
        }
    }

    async fn step(&self, world: &mut SimWorld) -> Result<StepReport, String> {
        world.step().await.map_err(|e| format!("worker bootstrap failed: {}", e))
    }

    /// No faults: the orchestrator mirrors both partitions after every tick.
    async fn run_baseline(&self, world: &mut SimWorld) -> Result<Run, String> {
        let mut run = Run::default();
        for _ in 0..self.ticks {
            let step = self.step(world).await?;
            run.observe(world, step, true);
        }

        let m = run.metrics.clone();
        run.check(m.deltas_applied > 0, || "no deltas applied".to_string());
        run.check(m.late_deltas == 0, || format!("{} late deltas without faults", m.late_deltas));
        run.check(m.poison_discarded == 0, || "poison without faults".to_string());
        run.check(m.snapshots_exported == self.ticks, || {
            format!("{} of {} snapshots exported", m.snapshots_exported, self.ticks)
        });
        Ok(run)
    }

    /// Every unordered message stored twice. Workers replay their cached
    /// batch for the second copy of a tick, so state still converges.
    async fn run_duplicate_delivery(&self, world: &mut SimWorld) -> Result<Run, String> {
        world.controller().set_duplicate_probability(1.0).await;

        let mut run = Run::default();
        for _ in 0..self.ticks {
            let step = self.step(world).await?;
            run.observe(world, step, true);
        }

        let m = run.metrics.clone();
        run.check(m.duplicate_ticks >= self.ticks, || {
            format!("only {} duplicate ticks replayed", m.duplicate_ticks)
        });
        Ok(run)
    }

    /// Every drain hands out visible messages in random order, with every
    /// unordered message stored twice. One delta per entity per tick means
    /// the merge result does not depend on delivery order.
    async fn run_reordered_delivery(&self, world: &mut SimWorld) -> Result<Run, String> {
        let controller = world.controller();
        controller.set_shuffle(true).await;
        controller.set_duplicate_probability(1.0).await;

        let mut run = Run::default();
        for _ in 0..self.ticks {
            let step = self.step(world).await?;
            run.observe(world, step, true);
        }

        let m = run.metrics.clone();
        let stats = world.channel.stats().await;
        run.check(stats.duplicated > 0, || "no message was duplicated".to_string());
        run.check(m.late_deltas == 0, || format!("{} late deltas", m.late_deltas));
        run.check(m.deltas_rejected == 0, || format!("{} deltas rejected", m.deltas_rejected));
        Ok(run)
    }

    /// Deltas become visible a tick and a half after publish, so every drain
    /// merges the previous tick's deltas. A final clean tick flushes them.
    async fn run_late_delivery(&self, world: &mut SimWorld) -> Result<Run, String> {
        let updates = world.config.channels.updates.clone();
        let delay = world.config.tick_interval() + world.config.settle_interval();
        world.controller().set_delivery_delay(&updates, delay).await;

        let mut run = Run::default();
        for _ in 0..self.ticks - 1 {
            let step = self.step(world).await?;
            run.observe(world, step, false);
        }
        world.controller().clear_faults().await;
        let step = self.step(world).await?;
        run.observe(world, step, true);

        let m = run.metrics.clone();
        run.check(m.late_deltas > 0, || "no late deltas observed".to_string());
        run.check(m.deltas_rejected == 0, || format!("{} deltas rejected", m.deltas_rejected));
        Ok(run)
    }

    /// Garbage and unknown event types on every channel, every tick.
    async fn run_poison_message(&self, world: &mut SimWorld) -> Result<Run, String> {
        let controller = world.controller();
        let channels = world.config.channels.clone();
        let mut injected = 0u64;

        let mut run = Run::default();
        for _ in 0..self.ticks {
            for channel in channels.tick_channels() {
                controller
                    .inject_raw(channel, b"\x00\xffnot json".to_vec())
                    .await
                    .map_err(|e| e.to_string())?;
                injected += 1;
            }
            controller
                .inject_raw(&channels.updates, br#"{"type":"VehicleMoved","data":{"vehicle_id":1}}"#.to_vec())
                .await
                .map_err(|e| e.to_string())?;
            controller
                .inject_raw(&channels.updates, br#"{"type":"WEATHER_CHANGED","data":{}}"#.to_vec())
                .await
                .map_err(|e| e.to_string())?;
            injected += 1;

            let step = self.step(world).await?;
            run.observe(world, step, true);
        }

        let m = run.metrics.clone();
        run.check(m.poison_discarded == injected, || {
            format!("{} poison discarded, {} injected", m.poison_discarded, injected)
        });
        run.check(m.unknown_discarded == self.ticks, || {
            format!("{} unknown discarded, {} injected", m.unknown_discarded, self.ticks)
        });
        let left = world.channel.depth(&channels.updates).await;
        run.check(left == 0, || format!("{} messages stuck on {}", left, channels.updates));
        Ok(run)
    }

    /// Workers start empty; a stray tick before `Initialize` is dropped.
    async fn run_cold_start(&self, world: &mut SimWorld) -> Result<Run, String> {
        let stray = ControlEvent::Tick(TickEvent { tick_number: 0 })
            .encode()
            .map_err(|e| e.to_string())?;
        let controller = world.controller();
        for channel in world.config.channels.tick_channels() {
            controller
                .inject_raw(channel, stray.clone())
                .await
                .map_err(|e| e.to_string())?;
        }
        world
            .orchestrator
            .bootstrap()
            .await
            .map_err(|e| format!("bootstrap failed: {}", e))?;

        let mut run = Run::default();
        for _ in 0..self.ticks {
            let step = self.step(world).await?;
            run.observe(world, step, true);
        }

        let m = run.metrics.clone();
        run.check(m.dropped_uninitialized == 2, || {
            format!("{} ticks dropped before bootstrap, expected 2", m.dropped_uninitialized)
        });
        run.check(world.mobility.is_initialized() && world.signal.is_initialized(), || {
            "workers never bootstrapped".to_string()
        });
        run.check(m.deltas_applied > 0, || "no deltas applied".to_string());
        Ok(run)
    }

    /// Tick publishes fail at tick 3 and receives fail at tick 5; the loops
    /// keep going and state converges once the channel recovers.
    async fn run_transient_outage(&self, world: &mut SimWorld) -> Result<Run, String> {
        let controller = world.controller();

        let mut run = Run::default();
        for tick in 1..=self.ticks {
            match tick {
                3 => controller.fail_next_publishes(2).await,
                5 => controller.fail_next_receives(3).await,
                _ => {}
            }
            let step = self.step(world).await?;
            // a worker that missed its receive catches up next tick
            run.observe(world, step, tick != 5);
        }

        let m = run.metrics.clone();
        run.check(m.publish_failures == 2, || format!("{} publish failures", m.publish_failures));
        run.check(m.receive_failures == 3, || format!("{} receive failures", m.receive_failures));
        run.check(m.snapshots_exported == self.ticks, || {
            format!("{} of {} snapshots exported", m.snapshots_exported, self.ticks)
        });
        let backlog = world.channel.depth(&world.config.channels.mobility_ticks).await;
        run.check(backlog == 0, || format!("{} ticks left unprocessed", backlog));
        Ok(run)
    }
}
