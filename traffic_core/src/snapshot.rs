//! Exported snapshots of the canonical world state.

use crate::model::{
    Intersection, IntersectionId, LightState, Road, RoadId, VehicleId, VehiclePosition, WorldState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete, immutable copy of the world at the end of a tick.
///
/// Written as one document per tick; readers never see a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tick: u64,
    pub roads: BTreeMap<RoadId, Road>,
    pub intersections: BTreeMap<IntersectionId, Intersection>,
    pub vehicles: BTreeMap<VehicleId, VehiclePosition>,
    pub traffic_lights: BTreeMap<IntersectionId, LightState>,
    pub blockages: BTreeMap<RoadId, bool>,
}

impl Snapshot {
    /// Blob name of the versioned snapshot for `tick`.
    pub fn blob_name(prefix: &str, tick: u64) -> String {
        format!("{}/tick-{:08}.json", prefix, tick)
    }

    /// Blob name that always holds the most recent snapshot.
    pub fn latest_name(prefix: &str) -> String {
        format!("{}/latest.json", prefix)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// True when every entity matches `other`, ignoring the tick.
    pub fn same_entities(&self, other: &Snapshot) -> bool {
        self.roads == other.roads
            && self.intersections == other.intersections
            && self.vehicles == other.vehicles
            && self.traffic_lights == other.traffic_lights
            && self.blockages == other.blockages
    }
}

impl WorldState {
    /// Copies the current state into a snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick(),
            roads: self.roads.clone(),
            intersections: self.intersections.clone(),
            vehicles: self.vehicles.clone(),
            traffic_lights: self.traffic_lights.clone(),
            blockages: self.blockages.clone(),
        }
    }
}
