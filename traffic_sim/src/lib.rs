//! Traffic Simulation Harness
//!
//! Runs the orchestrator and both workers against in-memory infrastructure
//! on one virtual clock, so whole runs are reproducible from a seed:
//! - **Time**: virtual clock, advanced only by sleeps and long polls
//! - **Channel**: in-memory queues with visibility timeouts, ordered groups
//!   and injectable faults (duplicates, delays, shuffling, failures)
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  ┌──────────────┐    ticks    ┌────────────────────┐     │
//! │  │ Orchestrator │ ──────────► │ Mobility / Signal  │     │
//! │  │ (WorldState) │ ◄────────── │      Workers       │     │
//! │  └──────┬───────┘   deltas    └────────────────────┘     │
//! │         │        InMemoryChannel + BrokerController      │
//! │         ▼                                                │
//! │   MemoryBlobStore (bundle, snapshots)                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use traffic_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_ticks(20).run(ScenarioId::LateDelivery).await;
//! assert!(result.passed);
//! ```

mod broker;
mod context;
mod exporter;
mod fixtures;
mod runner;
mod store;
mod world;
pub mod scenarios;

pub use broker::{BrokerController, BrokerStats, Faults, InMemoryChannel};
pub use context::SimContext;
pub use exporter::TimelineExport;
pub use fixtures::Topology;
pub use runner::{divergence, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use store::MemoryBlobStore;
pub use world::{SimChannel, SimOrchestrator, SimWorker, SimWorld, StepReport};
