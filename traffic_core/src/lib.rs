//! Traffic Simulation Core - Tick-Synchronized Distributed World State
//!
//! World state is split across independent processes that only talk through
//! a message channel and a blob store:
//! 1. **Orchestrator**: owns the canonical [`WorldState`], drives the tick
//!    clock, merges worker deltas, exports one snapshot per tick
//! 2. **Workers**: own a disjoint [`Partition`] each (vehicles, or lights and
//!    blockages), recompute it on every tick and emit deltas
//!
//! ```text
//! Orchestrator --tick--> [mobility-ticks] --> Mobility Worker --+
//!      |       --tick--> [signal-ticks]   --> Signal Worker   --+--> [updates]
//!      |                                                            |
//!      +<------------------- drain / merge (last-write-wins) -------+
//!      |
//!      +--> snapshot export (blob store)
//! ```
//!
//! Delivery is at-least-once and possibly reordered; recompute is keyed by
//! tick number so redelivered ticks are safe.

pub mod backoff;
pub mod bundle;
pub mod config;
pub mod error;
pub mod events;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod snapshot;
pub mod worker;

// Re-export key types for convenience
pub use backoff::Backoff;
pub use bundle::{Bundle, BundleRef, SliceName};
pub use config::{SimulationConfig, LightPolicy};
pub use error::{BootstrapError, ConfigError, CoreError, DecodeError, MergeError};
pub use events::{ControlEvent, Decoded, DeltaEvent, TickEvent, UpdateEvent};
pub use model::{
    Intersection, IntersectionId, LightState, Road, RoadId, VehicleId, VehiclePosition, WorldState,
};
pub use orchestrator::{Orchestrator, TickReport};
pub use snapshot::Snapshot;
pub use worker::{
    DeltaBatch, EmitReport, MobilityPartition, Partition, PollReport, SignalPartition, Worker,
    WorkerPhase, WorkerRole,
};
