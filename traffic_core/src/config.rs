//! Simulation configuration.
//!
//! Every process reads the same JSON document; every field has a default so
//! an empty `{}` is a valid configuration.

use crate::bundle::{BundleDefaults, BundleRef};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Channel names for the tick fan-out and the update fan-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNames {
    /// Tick channel consumed by the mobility worker
    pub mobility_ticks: String,

    /// Tick channel consumed by the signal worker
    pub signal_ticks: String,

    /// Delta stream consumed by the orchestrator
    pub updates: String,

    /// Optional `StateExported` feed for snapshot consumers
    pub snapshots: Option<String>,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            mobility_ticks: "mobility-ticks".to_string(),
            signal_ticks: "signal-ticks".to_string(),
            updates: "simcore-updates".to_string(),
            snapshots: None,
        }
    }
}

impl ChannelNames {
    /// Every tick channel the orchestrator publishes to.
    pub fn tick_channels(&self) -> [&str; 2] {
        [self.mobility_ticks.as_str(), self.signal_ticks.as_str()]
    }
}

/// Mobility worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobilityConfig {
    /// Fixed motion increment: position += speed * step
    pub step: f64,

    /// Speed for vehicles whose bundle row has none
    pub default_speed: f64,
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            step: 0.01,
            default_speed: 20.0,
        }
    }
}

/// How traffic lights change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LightPolicy {
    /// Each tick, flip green <-> red with the given probability
    Probabilistic { change_probability: f64 },

    /// green -> yellow -> red -> green with fixed dwell times (in ticks)
    Cycle {
        green_ticks: u32,
        yellow_ticks: u32,
        red_ticks: u32,
    },
}

impl Default for LightPolicy {
    fn default() -> Self {
        LightPolicy::Probabilistic {
            change_probability: 0.2,
        }
    }
}

/// Inclusive range of blockage durations, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
}

/// Signal worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub light_policy: LightPolicy,

    /// Chance per tick of blocking one currently clear road
    pub blockage_probability: f64,

    pub blockage_duration: DurationRange,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            light_policy: LightPolicy::default(),
            blockage_probability: 0.1,
            blockage_duration: DurationRange { min: 3, max: 10 },
        }
    }
}

/// Bounded exponential backoff for channel failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            max_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Configuration shared by the orchestrator and both workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time between tick starts
    pub tick_interval_ms: u64,

    /// Pause between publishing a tick and draining updates
    pub settle_interval_ms: u64,

    /// Messages requested per receive call
    pub max_messages_per_poll: usize,

    /// Receive calls per drain before the orchestrator moves on
    pub max_polls_per_drain: usize,

    /// Long-poll wait per receive call
    pub wait_time_per_poll_ms: u64,

    /// Worker pause after an empty poll
    pub idle_sleep_ms: u64,

    pub channels: ChannelNames,

    /// Publish deltas in an ordered group keyed by worker role
    pub ordered_updates: bool,

    /// Bootstrap bundle; workers without one wait for `Initialize`
    pub bundle: Option<BundleRef>,

    /// Blob name prefix for exported snapshots
    pub snapshot_prefix: String,

    /// Discard deltas stamped with a tick older than the current one.
    ///
    /// Off by default: late deltas are applied last-write-wins.
    pub reject_stale_deltas: bool,

    /// Master seed for worker entropy; random when absent
    pub seed: Option<u64>,

    pub mobility: MobilityConfig,
    pub signal: SignalConfig,
    pub backoff: BackoffConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            settle_interval_ms: 500,
            max_messages_per_poll: 10,
            max_polls_per_drain: 100,
            wait_time_per_poll_ms: 200,
            idle_sleep_ms: 100,
            channels: ChannelNames::default(),
            ordered_updates: false,
            bundle: None,
            snapshot_prefix: "snapshots".to_string(),
            reject_stale_deltas: false,
            seed: None,
            mobility: MobilityConfig::default(),
            signal: SignalConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Loads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be > 0".into());
        }
        if self.settle_interval_ms > self.tick_interval_ms {
            return invalid(format!(
                "settle_interval_ms ({}) exceeds tick_interval_ms ({})",
                self.settle_interval_ms, self.tick_interval_ms
            ));
        }
        if self.max_messages_per_poll == 0 || self.max_polls_per_drain == 0 {
            return invalid("poll sizes must be > 0".into());
        }
        if !(self.mobility.step > 0.0 && self.mobility.step.is_finite()) {
            return invalid(format!("mobility.step must be > 0, got {}", self.mobility.step));
        }
        if self.mobility.default_speed < 0.0 {
            return invalid("mobility.default_speed must be >= 0".into());
        }
        match &self.signal.light_policy {
            LightPolicy::Probabilistic { change_probability } => {
                if !(0.0..=1.0).contains(change_probability) {
                    return invalid(format!("change_probability {} outside [0, 1]", change_probability));
                }
            }
            LightPolicy::Cycle {
                green_ticks,
                yellow_ticks,
                red_ticks,
            } => {
                if *green_ticks == 0 || *yellow_ticks == 0 || *red_ticks == 0 {
                    return invalid("cycle dwell times must be >= 1 tick".into());
                }
            }
        }
        if !(0.0..=1.0).contains(&self.signal.blockage_probability) {
            return invalid(format!(
                "blockage_probability {} outside [0, 1]",
                self.signal.blockage_probability
            ));
        }
        let range = self.signal.blockage_duration;
        if range.min == 0 || range.min > range.max {
            return invalid(format!("blockage_duration [{}, {}] is empty", range.min, range.max));
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms || self.backoff.multiplier < 1.0 {
            return invalid("backoff requires 0 < initial_ms <= max_ms and multiplier >= 1".into());
        }
        let names = [&self.channels.mobility_ticks, &self.channels.signal_ticks, &self.channels.updates];
        if names.iter().any(|n| n.is_empty())
            || names[0] == names[1]
            || names[0] == names[2]
            || names[1] == names[2]
        {
            return invalid("channel names must be non-empty and distinct".into());
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn wait_time_per_poll(&self) -> Duration {
        Duration::from_millis(self.wait_time_per_poll_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// Defaults applied to optional bundle columns.
    pub fn bundle_defaults(&self) -> BundleDefaults {
        BundleDefaults {
            vehicle_speed: self.mobility.default_speed,
            blockage_ticks: self.signal.blockage_duration.max,
        }
    }
}
