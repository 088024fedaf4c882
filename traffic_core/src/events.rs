//! Event envelopes exchanged over the message channel.
//!
//! Every payload is a JSON envelope `{"type": <string>, "data": <object>}`.
//! Decoding switches on the discriminator explicitly; a type this process
//! does not know yields [`Decoded::Unknown`] so the caller can log and
//! discard it, while a malformed body is a [`DecodeError`] (poison).

use crate::bundle::BundleRef;
use crate::error::DecodeError;
use crate::model::{IntersectionId, LightState, RoadId, VehicleId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use traffic_env::BlobRef;

// Control stream (orchestrator -> workers)
pub const INITIALIZE: &str = "Initialize";
pub const SIMULATION_TICK: &str = "SimulationTick";

// Update stream (workers -> orchestrator)
pub const VEHICLE_MOVED: &str = "VehicleMoved";
pub const LIGHT_CHANGED: &str = "LightChanged";
pub const BLOCKAGE_CREATED: &str = "BlockageCreated";
pub const BLOCKAGE_REMOVED: &str = "BlockageRemoved";
pub const LEGACY_LIGHT_CHANGE: &str = "TRAFFIC_LIGHT_CHANGE";
pub const LEGACY_ROAD_BLOCKAGE: &str = "ROAD_BLOCKAGE";

// Snapshot feed
pub const STATE_EXPORTED: &str = "StateExported";

/// Result of decoding a well-formed envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Known(T),
    /// Discriminator this decoder does not handle
    Unknown(String),
}

/// The global tick signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvent {
    pub tick_number: u64,
}

/// Messages on a worker's tick channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Cold-start bundle announcement
    Initialize { bundle: BundleRef },
    Tick(TickEvent),
}

/// A single state change produced by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    VehicleMoved {
        vehicle_id: VehicleId,
        road: RoadId,
        position: f64,
        speed: Option<f64>,
    },
    LightChanged {
        intersection: IntersectionId,
        state: LightState,
    },
    BlockageCreated {
        road: RoadId,
    },
    BlockageRemoved {
        road: RoadId,
    },
}

impl DeltaEvent {
    /// Wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            DeltaEvent::VehicleMoved { .. } => VEHICLE_MOVED,
            DeltaEvent::LightChanged { .. } => LIGHT_CHANGED,
            DeltaEvent::BlockageCreated { .. } => BLOCKAGE_CREATED,
            DeltaEvent::BlockageRemoved { .. } => BLOCKAGE_REMOVED,
        }
    }

    /// Identity of the entity this delta overwrites (`kind:id`).
    pub fn entity_key(&self) -> String {
        match self {
            DeltaEvent::VehicleMoved { vehicle_id, .. } => format!("vehicle:{}", vehicle_id),
            DeltaEvent::LightChanged { intersection, .. } => format!("light:{}", intersection),
            DeltaEvent::BlockageCreated { road } | DeltaEvent::BlockageRemoved { road } => {
                format!("blockage:{}", road)
            }
        }
    }
}

/// A delta stamped with the tick it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    /// `None` for producers that do not stamp ticks
    pub tick: Option<u64>,
    pub delta: DeltaEvent,
}

impl UpdateEvent {
    pub fn new(tick: u64, delta: DeltaEvent) -> Self {
        Self {
            tick: Some(tick),
            delta,
        }
    }
}

/// Notification that a snapshot was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExported {
    pub tick_number: u64,
    pub location: BlobRef,
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OutEnvelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct InitializeData {
    #[serde(alias = "s3_links")]
    bundle: BundleRef,
}

#[derive(Serialize, Deserialize)]
struct VehicleMovedData {
    vehicle_id: VehicleId,
    road: RoadId,
    position_on_road: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct LightChangedData {
    intersection: IntersectionId,
    new_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct BlockageData {
    road: RoadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
}

#[derive(Deserialize)]
struct LegacyBlockageData {
    road: RoadId,
    blockage_status: String,
    #[serde(default)]
    tick: Option<u64>,
}

fn encode<T: Serialize>(kind: &str, data: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&OutEnvelope { kind, data })
}

fn parse<T: DeserializeOwned>(kind: &str, data: serde_json::Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Data {
        kind: kind.to_string(),
        source,
    })
}

fn envelope(bytes: &[u8]) -> Result<RawEnvelope, DecodeError> {
    serde_json::from_slice(bytes).map_err(DecodeError::Envelope)
}

// ---------------------------------------------------------------------------
// Control stream
// ---------------------------------------------------------------------------

impl ControlEvent {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            ControlEvent::Initialize { bundle } => encode(
                INITIALIZE,
                &InitializeData {
                    bundle: bundle.clone(),
                },
            ),
            ControlEvent::Tick(tick) => encode(SIMULATION_TICK, tick),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Decoded<ControlEvent>, DecodeError> {
        let RawEnvelope { kind, data } = envelope(bytes)?;
        let event = match kind.as_str() {
            INITIALIZE => {
                let d: InitializeData = parse(&kind, data)?;
                ControlEvent::Initialize { bundle: d.bundle }
            }
            SIMULATION_TICK => ControlEvent::Tick(parse(&kind, data)?),
            _ => return Ok(Decoded::Unknown(kind)),
        };
        Ok(Decoded::Known(event))
    }
}

// ---------------------------------------------------------------------------
// Update stream
// ---------------------------------------------------------------------------

impl UpdateEvent {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let tick = self.tick;
        match &self.delta {
            DeltaEvent::VehicleMoved {
                vehicle_id,
                road,
                position,
                speed,
            } => encode(
                VEHICLE_MOVED,
                &VehicleMovedData {
                    vehicle_id: vehicle_id.clone(),
                    road: road.clone(),
                    position_on_road: *position,
                    speed: *speed,
                    tick,
                },
            ),
            DeltaEvent::LightChanged {
                intersection,
                state,
            } => encode(
                LIGHT_CHANGED,
                &LightChangedData {
                    intersection: intersection.clone(),
                    new_state: state.name().to_string(),
                    tick,
                },
            ),
            DeltaEvent::BlockageCreated { road } => encode(
                BLOCKAGE_CREATED,
                &BlockageData {
                    road: road.clone(),
                    tick,
                },
            ),
            DeltaEvent::BlockageRemoved { road } => encode(
                BLOCKAGE_REMOVED,
                &BlockageData {
                    road: road.clone(),
                    tick,
                },
            ),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Decoded<UpdateEvent>, DecodeError> {
        let RawEnvelope { kind, data } = envelope(bytes)?;
        let event = match kind.as_str() {
            VEHICLE_MOVED => {
                let d: VehicleMovedData = parse(&kind, data)?;
                UpdateEvent {
                    tick: d.tick,
                    delta: DeltaEvent::VehicleMoved {
                        vehicle_id: d.vehicle_id,
                        road: d.road,
                        position: d.position_on_road,
                        speed: d.speed,
                    },
                }
            }
            LIGHT_CHANGED | LEGACY_LIGHT_CHANGE => {
                let d: LightChangedData = parse(&kind, data)?;
                let state = d.new_state.parse().map_err(|reason| DecodeError::Invalid {
                    kind: kind.clone(),
                    reason,
                })?;
                UpdateEvent {
                    tick: d.tick,
                    delta: DeltaEvent::LightChanged {
                        intersection: d.intersection,
                        state,
                    },
                }
            }
            BLOCKAGE_CREATED => {
                let d: BlockageData = parse(&kind, data)?;
                UpdateEvent {
                    tick: d.tick,
                    delta: DeltaEvent::BlockageCreated { road: d.road },
                }
            }
            BLOCKAGE_REMOVED => {
                let d: BlockageData = parse(&kind, data)?;
                UpdateEvent {
                    tick: d.tick,
                    delta: DeltaEvent::BlockageRemoved { road: d.road },
                }
            }
            LEGACY_ROAD_BLOCKAGE => {
                let d: LegacyBlockageData = parse(&kind, data)?;
                let delta = match d.blockage_status.as_str() {
                    "blocked" => DeltaEvent::BlockageCreated { road: d.road },
                    "unblocked" => DeltaEvent::BlockageRemoved { road: d.road },
                    other => {
                        return Err(DecodeError::Invalid {
                            kind,
                            reason: format!("Unknown blockage status: {}", other),
                        })
                    }
                };
                UpdateEvent { tick: d.tick, delta }
            }
            _ => return Ok(Decoded::Unknown(kind)),
        };
        Ok(Decoded::Known(event))
    }
}

// ---------------------------------------------------------------------------
// Snapshot feed
// ---------------------------------------------------------------------------

impl StateExported {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        encode(STATE_EXPORTED, self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Decoded<StateExported>, DecodeError> {
        let RawEnvelope { kind, data } = envelope(bytes)?;
        match kind.as_str() {
            STATE_EXPORTED => Ok(Decoded::Known(parse(&kind, data)?)),
            _ => Ok(Decoded::Unknown(kind)),
        }
    }
}
