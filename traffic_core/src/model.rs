//! World data model: topology, owned entities and the canonical aggregate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Road identifier, e.g. `"A-B"`.
    RoadId
);
string_id!(
    /// Intersection identifier, e.g. `"A"`.
    IntersectionId
);
string_id!(
    /// Vehicle identifier, e.g. `"vehicle_3"`.
    VehicleId
);

/// Planar coordinates of an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An intersection. Immutable after bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: IntersectionId,
    #[serde(flatten)]
    pub location: Point,
}

/// A directed road between two intersections. Immutable after bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Road {
    pub id: RoadId,
    pub start: IntersectionId,
    pub end: IntersectionId,
    /// Always > 0
    pub length: f64,
    /// Always > 0
    pub speed_limit: f64,
    pub start_point: Point,
    pub end_point: Point,
}

/// Where a vehicle is. Owned by the mobility worker, mirrored by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub vehicle_id: VehicleId,
    pub road: RoadId,
    /// Distance along `road`, in `[0, road.length)`
    pub position: f64,
    pub speed: f64,
}

/// Traffic light color. Owned by the signal worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightState {
    Green,
    Yellow,
    Red,
}

impl LightState {
    pub fn name(&self) -> &'static str {
        match self {
            LightState::Green => "green",
            LightState::Yellow => "yellow",
            LightState::Red => "red",
        }
    }

    /// Next color of the green → yellow → red → green cycle.
    pub fn next_in_cycle(&self) -> LightState {
        match self {
            LightState::Green => LightState::Yellow,
            LightState::Yellow => LightState::Red,
            LightState::Red => LightState::Green,
        }
    }

    /// Green/red flip used by the probabilistic policy; yellow resolves to red.
    pub fn flipped(&self) -> LightState {
        match self {
            LightState::Green | LightState::Yellow => LightState::Red,
            LightState::Red => LightState::Green,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LightState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "green" => Ok(LightState::Green),
            "yellow" => Ok(LightState::Yellow),
            "red" => Ok(LightState::Red),
            _ => Err(format!("Unknown light state: {}", s)),
        }
    }
}

/// The canonical aggregate, owned exclusively by the orchestrator.
///
/// Mutated only by the merge step (see [`crate::merge`]). Maps are ordered
/// so snapshots serialize identically for identical state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    pub roads: BTreeMap<RoadId, Road>,
    pub intersections: BTreeMap<IntersectionId, Intersection>,
    pub vehicles: BTreeMap<VehicleId, VehiclePosition>,
    pub traffic_lights: BTreeMap<IntersectionId, LightState>,
    pub blockages: BTreeMap<RoadId, bool>,
    tick: u64,
}

impl WorldState {
    /// Current tick; never decreases.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Moves the tick forward to `tick`; earlier values are ignored.
    pub fn advance_to(&mut self, tick: u64) {
        self.tick = self.tick.max(tick);
    }

    /// Roads starting at `intersection`, in id order.
    pub fn roads_from<'a>(&'a self, intersection: &'a IntersectionId) -> impl Iterator<Item = &'a Road> + 'a {
        self.roads.values().filter(move |r| &r.start == intersection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_state_parse_and_display() {
        assert_eq!("GREEN".parse::<LightState>().unwrap(), LightState::Green);
        assert_eq!("red".parse::<LightState>().unwrap(), LightState::Red);
        assert!("blue".parse::<LightState>().is_err());
        assert_eq!(LightState::Yellow.to_string(), "yellow");
    }

    #[test]
    fn test_light_transitions() {
        assert_eq!(LightState::Green.next_in_cycle(), LightState::Yellow);
        assert_eq!(LightState::Yellow.next_in_cycle(), LightState::Red);
        assert_eq!(LightState::Red.next_in_cycle(), LightState::Green);

        assert_eq!(LightState::Green.flipped(), LightState::Red);
        assert_eq!(LightState::Red.flipped(), LightState::Green);
        assert_eq!(LightState::Yellow.flipped(), LightState::Red);
    }

    #[test]
    fn test_tick_never_goes_backwards() {
        let mut world = WorldState::default();
        world.advance_to(5);
        world.advance_to(3);
        assert_eq!(world.tick(), 5);
        world.advance_to(6);
        assert_eq!(world.tick(), 6);
    }

    #[test]
    fn test_light_state_serde_lowercase() {
        let json = serde_json::to_string(&LightState::Green).unwrap();
        assert_eq!(json, "\"green\"");
    }
}
