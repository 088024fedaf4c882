//! Merge of worker deltas into the canonical world state.
//!
//! Merge is last-write-wins per entity id: applying deltas in drain order,
//! a later delta for the same entity overwrites an earlier one, and deltas
//! for distinct entities commute. Nothing here consults the tick number.

use crate::error::MergeError;
use crate::events::DeltaEvent;
use crate::model::{IntersectionId, LightState, RoadId, VehicleId, WorldState};

impl WorldState {
    /// Overwrites a vehicle's road, position and (optionally) speed.
    pub fn update_vehicle(
        &mut self,
        vehicle_id: &VehicleId,
        road: &RoadId,
        position: f64,
        speed: Option<f64>,
    ) -> Result<(), MergeError> {
        if !self.roads.contains_key(road) {
            return Err(MergeError::UnknownRoad(road.clone()));
        }
        if !(position >= 0.0 && position.is_finite()) {
            return Err(MergeError::InvalidPosition {
                vehicle: vehicle_id.clone(),
                position,
            });
        }
        let vehicle = self
            .vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| MergeError::UnknownVehicle(vehicle_id.clone()))?;

        vehicle.road = road.clone();
        vehicle.position = position;
        if let Some(speed) = speed {
            vehicle.speed = speed;
        }
        Ok(())
    }

    /// Overwrites the light at an intersection.
    pub fn update_light(&mut self, intersection: &IntersectionId, state: LightState) -> Result<(), MergeError> {
        if !self.intersections.contains_key(intersection) {
            return Err(MergeError::UnknownIntersection(intersection.clone()));
        }
        self.traffic_lights.insert(intersection.clone(), state);
        Ok(())
    }

    /// Sets a road's blocked flag exactly as reported.
    pub fn update_blockage(&mut self, road: &RoadId, blocked: bool) -> Result<(), MergeError> {
        if !self.roads.contains_key(road) {
            return Err(MergeError::UnknownRoad(road.clone()));
        }
        self.blockages.insert(road.clone(), blocked);
        Ok(())
    }

    /// Dispatches a delta to its merge function.
    pub fn apply(&mut self, delta: &DeltaEvent) -> Result<(), MergeError> {
        match delta {
            DeltaEvent::VehicleMoved {
                vehicle_id,
                road,
                position,
                speed,
            } => self.update_vehicle(vehicle_id, road, *position, *speed),
            DeltaEvent::LightChanged { intersection, state } => self.update_light(intersection, *state),
            DeltaEvent::BlockageCreated { road } => self.update_blockage(road, true),
            DeltaEvent::BlockageRemoved { road } => self.update_blockage(road, false),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Intersection, Point, Road, VehiclePosition};
    use proptest::prelude::*;

    /// Three intersections, three roads, ten vehicles parked at 0.
    pub(crate) fn triangle_world() -> WorldState {
        let mut world = WorldState::default();
        for (id, x, y) in [("A", 0.0, 0.0), ("B", 1.0, 0.0), ("C", 0.0, 1.0)] {
            world.intersections.insert(
                id.into(),
                Intersection {
                    id: id.into(),
                    location: Point::new(x, y),
                },
            );
            world.traffic_lights.insert(id.into(), LightState::Red);
        }
        for (id, start, end, length) in [("A-B", "A", "B", 1.0), ("A-C", "A", "C", 1.0), ("B-C", "B", "C", 1.41)] {
            let start_point = world.intersections[&IntersectionId::from(start)].location;
            let end_point = world.intersections[&IntersectionId::from(end)].location;
            world.roads.insert(
                id.into(),
                Road {
                    id: id.into(),
                    start: start.into(),
                    end: end.into(),
                    length,
                    speed_limit: 50.0,
                    start_point,
                    end_point,
                },
            );
            world.blockages.insert(id.into(), false);
        }
        let roads = ["A-B", "A-C", "B-C"];
        for i in 0..10 {
            let id = VehicleId::new(format!("vehicle_{}", i));
            world.vehicles.insert(
                id.clone(),
                VehiclePosition {
                    vehicle_id: id,
                    road: roads[i % 3].into(),
                    position: 0.0,
                    speed: 20.0,
                },
            );
        }
        world
    }

    fn moved(vehicle: &str, road: &str, position: f64) -> DeltaEvent {
        DeltaEvent::VehicleMoved {
            vehicle_id: vehicle.into(),
            road: road.into(),
            position,
            speed: None,
        }
    }

    #[test]
    fn test_last_write_wins_within_drain() {
        let mut world = triangle_world();
        world.roads.get_mut(&RoadId::from("A-B")).unwrap().length = 10.0;

        world.apply(&moved("vehicle_0", "A-B", 5.0)).unwrap();
        world.apply(&moved("vehicle_0", "A-B", 7.0)).unwrap();

        assert_eq!(world.vehicles[&VehicleId::from("vehicle_0")].position, 7.0);
    }

    #[test]
    fn test_unknown_entities_rejected() {
        let mut world = triangle_world();
        assert_eq!(
            world.apply(&moved("ghost", "A-B", 0.1)),
            Err(MergeError::UnknownVehicle("ghost".into()))
        );
        assert_eq!(
            world.apply(&moved("vehicle_0", "Z-Z", 0.1)),
            Err(MergeError::UnknownRoad("Z-Z".into()))
        );
        assert_eq!(
            world.update_light(&"Q".into(), LightState::Green),
            Err(MergeError::UnknownIntersection("Q".into()))
        );
        assert!(world.apply(&moved("vehicle_0", "A-B", -1.0)).is_err());
    }

    #[test]
    fn test_blocked_flag_follows_reports() {
        let mut world = triangle_world();
        world.apply(&DeltaEvent::BlockageCreated { road: "A-C".into() }).unwrap();
        assert!(world.blockages[&RoadId::from("A-C")]);
        world.apply(&DeltaEvent::BlockageRemoved { road: "A-C".into() }).unwrap();
        assert!(!world.blockages[&RoadId::from("A-C")]);
    }

    #[test]
    fn test_speed_only_overwritten_when_reported() {
        let mut world = triangle_world();
        world
            .apply(&DeltaEvent::VehicleMoved {
                vehicle_id: "vehicle_1".into(),
                road: "A-C".into(),
                position: 0.3,
                speed: Some(12.0),
            })
            .unwrap();
        world.apply(&moved("vehicle_1", "A-C", 0.4)).unwrap();
        assert_eq!(world.vehicles[&VehicleId::from("vehicle_1")].speed, 12.0);
    }

    fn distinct_deltas() -> impl Strategy<Value = Vec<DeltaEvent>> {
        // one delta per vehicle and per light, so every key is distinct
        (
            proptest::collection::vec(0.0f64..1.0, 10),
            proptest::collection::vec(any::<bool>(), 3),
        )
            .prop_map(|(positions, greens)| {
                let mut deltas: Vec<DeltaEvent> = positions
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| moved(&format!("vehicle_{}", i), "A-B", p))
                    .collect();
                for (id, green) in ["A", "B", "C"].iter().zip(greens) {
                    deltas.push(DeltaEvent::LightChanged {
                        intersection: (*id).into(),
                        state: if green { LightState::Green } else { LightState::Red },
                    });
                }
                deltas
            })
    }

    proptest! {
        #[test]
        fn prop_distinct_keys_commute(
            (deltas, shuffled) in distinct_deltas().prop_flat_map(|deltas| {
                (Just(deltas.clone()), Just(deltas).prop_shuffle())
            })
        ) {
            let mut forward = triangle_world();
            for d in &deltas {
                forward.apply(d).unwrap();
            }

            let mut permuted = triangle_world();
            for d in &shuffled {
                permuted.apply(d).unwrap();
            }

            prop_assert_eq!(forward, permuted);
        }

        #[test]
        fn prop_duplicate_key_takes_last(first in 0.0f64..1.0, second in 0.0f64..1.0) {
            let mut world = triangle_world();
            world.apply(&moved("vehicle_2", "A-B", first)).unwrap();
            world.apply(&moved("vehicle_2", "A-B", second)).unwrap();
            prop_assert_eq!(world.vehicles[&VehicleId::from("vehicle_2")].position, second);
        }
    }
}
