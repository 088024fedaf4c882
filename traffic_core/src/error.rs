//! Error types for the simulation core.

use crate::bundle::SliceName;
use crate::model::{IntersectionId, RoadId, VehicleId};
use thiserror::Error;
use traffic_env::EnvError;

/// Failures while loading the bootstrap bundle. Always fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// No bundle reference in configuration and none announced
    #[error("No bootstrap bundle configured")]
    NoBundle,

    /// A required slice has no location in the bundle
    #[error("Bundle is missing required slice '{0}'")]
    MissingSlice(SliceName),

    /// The slice could not be downloaded
    #[error("Failed to fetch slice '{slice}': {source}")]
    Fetch {
        slice: SliceName,
        #[source]
        source: EnvError,
    },

    /// The slice bytes are not a valid columnar table
    #[error("Failed to decode slice '{slice}': {reason}")]
    Decode { slice: SliceName, reason: String },

    /// The slice decoded but violates a topology invariant
    #[error("Invalid slice '{slice}': {reason}")]
    Invalid { slice: SliceName, reason: String },
}

impl BootstrapError {
    pub fn decode(slice: SliceName, reason: impl Into<String>) -> Self {
        Self::Decode {
            slice,
            reason: reason.into(),
        }
    }

    pub fn invalid(slice: SliceName, reason: impl Into<String>) -> Self {
        Self::Invalid {
            slice,
            reason: reason.into(),
        }
    }
}

/// A payload that could not be decoded (poison message).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not a JSON `{type, data}` envelope
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Known type, but `data` does not match its shape
    #[error("Malformed '{kind}' data: {source}")]
    Data {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Field value outside its domain (e.g. unknown light color)
    #[error("Invalid '{kind}' data: {reason}")]
    Invalid { kind: String, reason: String },
}

/// A delta that cannot be applied to the canonical state.
#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(VehicleId),

    #[error("Unknown intersection: {0}")]
    UnknownIntersection(IntersectionId),

    #[error("Unknown road: {0}")]
    UnknownRoad(RoadId),

    #[error("Invalid position {position} for vehicle {vehicle}")]
    InvalidPosition { vehicle: VehicleId, position: f64 },
}

/// Configuration loading/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for process loops. Only bootstrap failures reach callers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
