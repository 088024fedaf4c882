//! Signal partition: traffic lights and road blockages.

use super::{Partition, WorkerRole};
use crate::bundle::{Bundle, SliceName};
use crate::config::{DurationRange, LightPolicy, SimulationConfig};
use crate::error::BootstrapError;
use crate::events::DeltaEvent;
use crate::model::{IntersectionId, LightState, RoadId};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// A light and the ticks it has spent in its current color.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Signal {
    state: LightState,
    dwell: u32,
}

/// Lights, active blockages and the policy that drives them.
#[derive(Debug, Clone)]
pub struct SignalPartition {
    lights: BTreeMap<IntersectionId, Signal>,
    roads: Vec<RoadId>,
    /// Active blockages and the ticks each has left
    blockages: BTreeMap<RoadId, u32>,

    policy: LightPolicy,
    blockage_probability: f64,
    blockage_duration: DurationRange,
}

impl SignalPartition {
    pub fn light(&self, intersection: &IntersectionId) -> Option<LightState> {
        self.lights.get(intersection).map(|s| s.state)
    }

    pub fn lights(&self) -> impl Iterator<Item = (&IntersectionId, LightState)> {
        self.lights.iter().map(|(id, s)| (id, s.state))
    }

    pub fn is_blocked(&self, road: &RoadId) -> bool {
        self.blockages.contains_key(road)
    }

    /// Active blockages and their remaining ticks.
    pub fn active_blockages(&self) -> &BTreeMap<RoadId, u32> {
        &self.blockages
    }

    /// Blocks `road` for `ticks` ticks. `None` if unknown or already blocked.
    pub fn block_road(&mut self, road: &RoadId, ticks: u32) -> Option<DeltaEvent> {
        if !self.roads.contains(road) || self.blockages.contains_key(road) {
            return None;
        }
        self.blockages.insert(road.clone(), ticks.max(1));
        Some(DeltaEvent::BlockageCreated { road: road.clone() })
    }

    fn advance_lights(&mut self, rng: &mut ChaCha8Rng, deltas: &mut Vec<DeltaEvent>) {
        for (id, signal) in self.lights.iter_mut() {
            let next = match &self.policy {
                LightPolicy::Probabilistic { change_probability } => {
                    rng.gen_bool(*change_probability).then(|| signal.state.flipped())
                }
                LightPolicy::Cycle {
                    green_ticks,
                    yellow_ticks,
                    red_ticks,
                } => {
                    signal.dwell += 1;
                    let limit = match signal.state {
                        LightState::Green => *green_ticks,
                        LightState::Yellow => *yellow_ticks,
                        LightState::Red => *red_ticks,
                    };
                    (signal.dwell >= limit).then(|| signal.state.next_in_cycle())
                }
            };

            if let Some(state) = next.filter(|s| *s != signal.state) {
                signal.state = state;
                signal.dwell = 0;
                deltas.push(DeltaEvent::LightChanged {
                    intersection: id.clone(),
                    state,
                });
            }
        }
    }

    fn advance_blockages(&mut self, rng: &mut ChaCha8Rng, deltas: &mut Vec<DeltaEvent>) {
        let mut cleared = Vec::new();
        for (road, remaining) in self.blockages.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                cleared.push(road.clone());
            }
        }
        for road in &cleared {
            self.blockages.remove(road);
            deltas.push(DeltaEvent::BlockageRemoved { road: road.clone() });
        }

        // at most one new blockage per tick, never on a road cleared this
        // tick: a batch carries at most one delta per road
        if self.blockage_probability > 0.0 && rng.gen_bool(self.blockage_probability) {
            let clear: Vec<&RoadId> = self
                .roads
                .iter()
                .filter(|r| !self.blockages.contains_key(*r) && !cleared.contains(*r))
                .collect();
            if !clear.is_empty() {
                let road = clear[rng.gen_range(0..clear.len())].clone();
                let DurationRange { min, max } = self.blockage_duration;
                let ticks = rng.gen_range(min..=max.max(min));
                if let Some(delta) = self.block_road(&road, ticks) {
                    deltas.push(delta);
                }
            }
        }
    }
}

impl Partition for SignalPartition {
    fn role() -> WorkerRole {
        WorkerRole::Signal
    }

    fn required_slices() -> &'static [SliceName] {
        &[
            SliceName::Intersections,
            SliceName::Roads,
            SliceName::TrafficLights,
            SliceName::RoadBlockages,
        ]
    }

    fn from_bundle(bundle: Bundle, config: &SimulationConfig) -> Result<Self, BootstrapError> {
        let lights = bundle
            .traffic_lights
            .into_iter()
            .map(|(id, state)| (id, Signal { state, dwell: 0 }))
            .collect();
        let blockages = bundle
            .blockages
            .into_iter()
            .filter(|(_, seed)| seed.blocked)
            .map(|(road, seed)| (road, seed.remaining_ticks.max(1)))
            .collect();

        let signal = &config.signal;
        Ok(Self {
            lights,
            roads: bundle.roads.into_keys().collect(),
            blockages,
            policy: signal.light_policy.clone(),
            blockage_probability: signal.blockage_probability,
            blockage_duration: signal.blockage_duration,
        })
    }

    /// Advances lights by the configured policy, then ages blockages and
    /// possibly starts one. Only changes are reported.
    fn recompute(&mut self, _tick: u64, rng: &mut ChaCha8Rng) -> Vec<DeltaEvent> {
        let mut deltas = Vec::new();
        self.advance_lights(rng, &mut deltas);
        self.advance_blockages(rng, &mut deltas);
        deltas
    }

    fn describe(&self) -> String {
        let policy = match &self.policy {
            LightPolicy::Probabilistic { change_probability } => {
                format!("probabilistic p={}", change_probability)
            }
            LightPolicy::Cycle {
                green_ticks,
                yellow_ticks,
                red_ticks,
            } => format!("cycle {}/{}/{}", green_ticks, yellow_ticks, red_ticks),
        };
        format!(
            "{} lights ({}), {} roads, {} active blockages",
            self.lights.len(),
            policy,
            self.roads.len(),
            self.blockages.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::triangle_bundle;
    use rand::SeedableRng;

    fn partition(configure: impl FnOnce(&mut SimulationConfig)) -> SignalPartition {
        let mut config = SimulationConfig::default();
        configure(&mut config);
        SignalPartition::from_bundle(triangle_bundle(), &config).unwrap()
    }

    fn five_red_lights() -> Bundle {
        let mut bundle = triangle_bundle();
        for id in ["D", "E"] {
            bundle.traffic_lights.insert(id.into(), LightState::Red);
        }
        bundle
    }

    #[test]
    fn test_certain_flip_turns_every_red_green() {
        let mut config = SimulationConfig::default();
        config.signal.light_policy = LightPolicy::Probabilistic {
            change_probability: 1.0,
        };
        config.signal.blockage_probability = 0.0;
        let mut signal = SignalPartition::from_bundle(five_red_lights(), &config).unwrap();

        let deltas = signal.recompute(1, &mut ChaCha8Rng::seed_from_u64(3));

        assert_eq!(deltas.len(), 5);
        assert!(deltas
            .iter()
            .all(|d| matches!(d, DeltaEvent::LightChanged { state: LightState::Green, .. })));
        assert!(signal.lights().all(|(_, state)| state == LightState::Green));
    }

    #[test]
    fn test_zero_probability_emits_nothing() {
        let mut signal = partition(|c| {
            c.signal.light_policy = LightPolicy::Probabilistic {
                change_probability: 0.0,
            };
            c.signal.blockage_probability = 0.0;
        });
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for tick in 1..=10 {
            assert!(signal.recompute(tick, &mut rng).is_empty());
        }
    }

    #[test]
    fn test_blockage_clears_after_its_duration() {
        let mut signal = partition(|c| c.signal.blockage_probability = 0.0);
        let road = RoadId::from("A-B");
        assert_eq!(
            signal.block_road(&road, 3),
            Some(DeltaEvent::BlockageCreated { road: road.clone() })
        );
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let removed = |deltas: &[DeltaEvent]| {
            deltas
                .iter()
                .filter(|d| matches!(d, DeltaEvent::BlockageRemoved { .. }))
                .count()
        };

        assert_eq!(removed(&signal.recompute(1, &mut rng)), 0);
        assert_eq!(removed(&signal.recompute(2, &mut rng)), 0);
        let third = signal.recompute(3, &mut rng);
        assert_eq!(removed(&third), 1);
        assert!(third.contains(&DeltaEvent::BlockageRemoved { road: road.clone() }));
        assert!(!signal.is_blocked(&road));
        assert_eq!(removed(&signal.recompute(4, &mut rng)), 0);
    }

    #[test]
    fn test_block_road_rejects_unknown_and_active() {
        let mut signal = partition(|_| {});
        assert!(signal.block_road(&RoadId::from("Z-Z"), 3).is_none());
        assert!(signal.block_road(&RoadId::from("A-C"), 3).is_some());
        assert!(signal.block_road(&RoadId::from("A-C"), 3).is_none());
    }

    #[test]
    fn test_certain_blockage_picks_a_clear_road() {
        let mut signal = partition(|c| {
            c.signal.light_policy = LightPolicy::Probabilistic {
                change_probability: 0.0,
            };
            c.signal.blockage_probability = 1.0;
            c.signal.blockage_duration = DurationRange { min: 10, max: 10 };
        });
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        for tick in 1..=3 {
            let deltas = signal.recompute(tick, &mut rng);
            assert_eq!(deltas.len(), 1);
        }
        // all three roads blocked, nothing left to block
        assert_eq!(signal.active_blockages().len(), 3);
        assert!(signal.recompute(4, &mut rng).is_empty());
    }

    #[test]
    fn test_cycle_policy_dwells() {
        let mut signal = partition(|c| {
            c.signal.light_policy = LightPolicy::Cycle {
                green_ticks: 2,
                yellow_ticks: 1,
                red_ticks: 2,
            };
            c.signal.blockage_probability = 0.0;
        });
        let a = IntersectionId::from("A");
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut seen = Vec::new();
        for tick in 1..=5 {
            signal.recompute(tick, &mut rng);
            seen.push(signal.light(&a).unwrap());
        }
        use LightState::*;
        assert_eq!(seen, vec![Red, Green, Green, Yellow, Red]);
    }

    #[test]
    fn test_cleared_road_is_not_reblocked_in_same_tick() {
        let mut signal = partition(|c| {
            c.signal.light_policy = LightPolicy::Probabilistic {
                change_probability: 0.0,
            };
            c.signal.blockage_probability = 1.0;
            c.signal.blockage_duration = DurationRange { min: 1, max: 1 };
        });
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert_eq!(signal.recompute(1, &mut rng).len(), 1);

        for tick in 2..=8 {
            let deltas = signal.recompute(tick, &mut rng);
            let keys: std::collections::BTreeSet<String> = deltas.iter().map(|d| d.entity_key()).collect();
            assert_eq!(deltas.len(), 2, "tick {}: {:?}", tick, deltas);
            assert_eq!(keys.len(), 2, "tick {}: {:?}", tick, deltas);
            assert_eq!(signal.active_blockages().len(), 1);
        }
    }

    #[test]
    fn test_bundle_blockages_become_active() {
        let mut bundle = triangle_bundle();
        bundle.blockages.get_mut(&RoadId::from("B-C")).unwrap().blocked = true;
        let signal = SignalPartition::from_bundle(bundle, &SimulationConfig::default()).unwrap();
        assert!(signal.is_blocked(&RoadId::from("B-C")));
        assert!(!signal.is_blocked(&RoadId::from("A-B")));
    }

    #[test]
    fn test_same_seed_same_deltas() {
        let mut a = partition(|_| {});
        let mut b = partition(|_| {});
        for tick in 1..=50 {
            assert_eq!(
                a.recompute(tick, &mut ChaCha8Rng::seed_from_u64(tick)),
                b.recompute(tick, &mut ChaCha8Rng::seed_from_u64(tick))
            );
        }
    }
}
