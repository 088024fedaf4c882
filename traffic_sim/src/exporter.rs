//! JSON exporter for simulation timelines.
//!
//! Writes the canonical snapshot of every tick of a run, plus the scenario
//! outcome, as one document for offline inspection.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use traffic_core::Snapshot;

/// Complete timeline of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineExport {
    /// Scenario name, or `live`
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Topology name
    pub topology: String,

    /// One snapshot per tick
    pub frames: Vec<Snapshot>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl TimelineExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, topology: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            topology: topology.to_string(),
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    pub fn add_frame(&mut self, frame: Snapshot) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_core::WorldState;

    #[test]
    fn test_write_and_read_back() {
        let mut export = TimelineExport::new("baseline", 42, "triangle");
        let mut world = WorldState::default();
        world.advance_to(1);
        export.add_frame(world.snapshot());
        world.advance_to(2);
        export.add_frame(world.snapshot());
        export.finalize(true, None);

        let file = tempfile::NamedTempFile::new().unwrap();
        export.write_to_file(file.path()).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let back: TimelineExport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.frames.len(), 2);
        assert_eq!(back.frames[1].tick, 2);
        assert!(back.passed);
        assert!(!text.contains("failure_reason"));
    }
}
