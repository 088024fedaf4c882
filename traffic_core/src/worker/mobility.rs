//! Mobility partition: vehicle positions.

use super::{Partition, WorkerRole};
use crate::bundle::{Bundle, SliceName};
use crate::config::SimulationConfig;
use crate::error::BootstrapError;
use crate::events::DeltaEvent;
use crate::model::{IntersectionId, Road, RoadId, VehicleId, VehiclePosition};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::warn;

/// Vehicles plus the read-only road graph they move on.
#[derive(Debug, Clone)]
pub struct MobilityPartition {
    roads: BTreeMap<RoadId, Road>,
    /// Roads leaving each intersection, in id order
    outgoing: BTreeMap<IntersectionId, Vec<RoadId>>,
    vehicles: BTreeMap<VehicleId, VehiclePosition>,
    step: f64,
}

impl MobilityPartition {
    pub fn new(
        roads: BTreeMap<RoadId, Road>,
        vehicles: BTreeMap<VehicleId, VehiclePosition>,
        step: f64,
    ) -> Self {
        let mut outgoing: BTreeMap<IntersectionId, Vec<RoadId>> = BTreeMap::new();
        for road in roads.values() {
            outgoing.entry(road.start.clone()).or_default().push(road.id.clone());
        }
        Self {
            roads,
            outgoing,
            vehicles,
            step,
        }
    }

    pub fn vehicles(&self) -> &BTreeMap<VehicleId, VehiclePosition> {
        &self.vehicles
    }

    pub fn vehicle(&self, id: &VehicleId) -> Option<&VehiclePosition> {
        self.vehicles.get(id)
    }
}

impl Partition for MobilityPartition {
    fn role() -> WorkerRole {
        WorkerRole::Mobility
    }

    fn required_slices() -> &'static [SliceName] {
        &[SliceName::Intersections, SliceName::Roads, SliceName::Vehicles]
    }

    fn from_bundle(bundle: Bundle, config: &SimulationConfig) -> Result<Self, BootstrapError> {
        if bundle.roads.is_empty() && !bundle.vehicles.is_empty() {
            return Err(BootstrapError::invalid(SliceName::Roads, "vehicles present but no roads"));
        }
        Ok(Self::new(bundle.roads, bundle.vehicles, config.mobility.step))
    }

    /// Moves every vehicle `speed * step` along its road.
    ///
    /// A vehicle reaching the end of its road restarts at 0 on a road leaving
    /// that road's end intersection, chosen uniformly; with no such road it
    /// stays on the current one. Every vehicle is reported.
    fn recompute(&mut self, _tick: u64, rng: &mut ChaCha8Rng) -> Vec<DeltaEvent> {
        let Self {
            roads,
            outgoing,
            vehicles,
            step,
        } = self;

        let mut deltas = Vec::with_capacity(vehicles.len());
        for vehicle in vehicles.values_mut() {
            let Some(road) = roads.get(&vehicle.road) else {
                warn!("Vehicle {} is on unknown road {}", vehicle.vehicle_id, vehicle.road);
                continue;
            };

            let mut position = vehicle.position + vehicle.speed * *step;
            if position >= road.length {
                position = 0.0;
                if let Some(next) = outgoing.get(&road.end).filter(|r| !r.is_empty()) {
                    vehicle.road = next[rng.gen_range(0..next.len())].clone();
                }
            }
            vehicle.position = position;

            deltas.push(DeltaEvent::VehicleMoved {
                vehicle_id: vehicle.vehicle_id.clone(),
                road: vehicle.road.clone(),
                position,
                speed: Some(vehicle.speed),
            });
        }
        deltas
    }

    fn describe(&self) -> String {
        format!(
            "{} vehicles on {} roads, step {}",
            self.vehicles.len(),
            self.roads.len(),
            self.step
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::triangle_bundle;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn partition() -> MobilityPartition {
        MobilityPartition::from_bundle(triangle_bundle(), &SimulationConfig::default()).unwrap()
    }

    #[test]
    fn test_one_tick_moves_every_vehicle() {
        let mut mobility = partition();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let deltas = mobility.recompute(1, &mut rng);

        assert_eq!(deltas.len(), 10);
        for delta in &deltas {
            match delta {
                DeltaEvent::VehicleMoved { position, speed, .. } => {
                    assert_relative_eq!(*position, 0.2, epsilon = 1e-9);
                    assert_eq!(*speed, Some(20.0));
                }
                other => panic!("unexpected delta {:?}", other),
            }
        }
    }

    #[test]
    fn test_wrap_moves_to_outgoing_road() {
        let mut mobility = partition();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let id = VehicleId::from("vehicle_0");
        assert_eq!(mobility.vehicle(&id).unwrap().road, RoadId::from("A-B"));

        // about 5 ticks to the end of A-B
        for tick in 1..=6 {
            mobility.recompute(tick, &mut rng);
            if mobility.vehicle(&id).unwrap().road != RoadId::from("A-B") {
                break;
            }
        }

        let vehicle = mobility.vehicle(&id).unwrap();
        assert_eq!(vehicle.position, 0.0);
        assert_eq!(vehicle.road, RoadId::from("B-C"));
    }

    #[test]
    fn test_dead_end_keeps_current_road() {
        let mut mobility = partition();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // vehicle_2 drives B-C; nothing leaves C
        let id = VehicleId::from("vehicle_2");

        for tick in 1..=8 {
            mobility.recompute(tick, &mut rng);
        }

        let vehicle = mobility.vehicle(&id).unwrap();
        assert_eq!(vehicle.road, RoadId::from("B-C"));
        assert!(vehicle.position < 1.41);
    }

    #[test]
    fn test_same_seed_same_deltas() {
        let mut a = partition();
        let mut b = partition();
        for tick in 1..=20 {
            let da = a.recompute(tick, &mut ChaCha8Rng::seed_from_u64(tick));
            let db = b.recompute(tick, &mut ChaCha8Rng::seed_from_u64(tick));
            assert_eq!(da, db);
        }
    }

    proptest! {
        #[test]
        fn prop_positions_stay_on_road(ticks in 1u64..200, seed in any::<u64>()) {
            let mut mobility = partition();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for tick in 1..=ticks {
                mobility.recompute(tick, &mut rng);
            }
            for vehicle in mobility.vehicles().values() {
                let length = mobility.roads[&vehicle.road].length;
                prop_assert!(vehicle.position >= 0.0);
                prop_assert!(vehicle.position < length);
            }
        }
    }
}
