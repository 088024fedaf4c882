//! Canned road networks for scenarios and tests.

use std::collections::BTreeMap;
use traffic_core::bundle::{upload_bundle, ColumnarTable};
use traffic_core::{BundleRef, CoreError, SliceName};
use traffic_env::BlobStore;

/// A road network expressed as bundle tables.
#[derive(Debug, Clone)]
pub struct Topology {
    pub name: &'static str,
    pub tables: BTreeMap<SliceName, ColumnarTable>,
}

impl Topology {
    /// 3 intersections, roads A-B, A-C, B-C (1.0, 1.0, 1.41), 10 vehicles at
    /// speed 20.
    pub fn triangle() -> Self {
        let ids = ["A", "B", "C"];
        let roads = ["A-B", "A-C", "B-C"];
        let vehicle_roads: Vec<&str> = (0..10).map(|i| roads[i % 3]).collect();

        Self::build(
            "triangle",
            &ids,
            &[0.0, 1.0, 0.0],
            &[0.0, 0.0, 1.0],
            &roads,
            &["A", "A", "B"],
            &["B", "C", "C"],
            &[1.0, 1.0, 1.41],
            &[50.0, 50.0, 40.0],
            &["green", "red", "yellow"],
            &vehicle_roads,
        )
    }

    /// 2x3 grid: 6 intersections, 10 roads, 20 vehicles at speed 20.
    pub fn grid() -> Self {
        let roads = ["A-B", "B-C", "D-E", "E-F", "A-D", "B-E", "C-F", "A-E", "B-D", "C-E"];
        let vehicle_roads: Vec<&str> = (0..20).map(|i| roads[i % roads.len()]).collect();

        Self::build(
            "grid",
            &["A", "B", "C", "D", "E", "F"],
            &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0],
            &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            &roads,
            &["A", "B", "D", "E", "A", "B", "C", "A", "B", "C"],
            &["B", "C", "E", "F", "D", "E", "F", "E", "D", "E"],
            &[1.0, 1.0, 1.0, 1.0, 1.0, 1.41, 1.41, 1.41, 1.41, 1.41],
            &[50.0, 50.0, 50.0, 50.0, 50.0, 40.0, 40.0, 40.0, 40.0, 40.0],
            &["green", "red", "yellow", "green", "red", "yellow"],
            &vehicle_roads,
        )
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "triangle" => Some(Self::triangle()),
            "grid" => Some(Self::grid()),
            _ => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        name: &'static str,
        intersections: &[&str],
        xs: &[f64],
        ys: &[f64],
        roads: &[&str],
        starts: &[&str],
        ends: &[&str],
        lengths: &[f64],
        speed_limits: &[f64],
        lights: &[&str],
        vehicle_roads: &[&str],
    ) -> Self {
        let vehicle_ids: Vec<String> = (0..vehicle_roads.len()).map(|i| format!("vehicle_{}", i)).collect();

        let mut tables = BTreeMap::new();
        tables.insert(
            SliceName::Intersections,
            ColumnarTable::new()
                .with_column("intersection_id", intersections.to_vec())
                .with_column("x", xs.to_vec())
                .with_column("y", ys.to_vec()),
        );
        tables.insert(
            SliceName::Roads,
            ColumnarTable::new()
                .with_column("road_id", roads.to_vec())
                .with_column("start", starts.to_vec())
                .with_column("end", ends.to_vec())
                .with_column("length", lengths.to_vec())
                .with_column("speed_limit", speed_limits.to_vec()),
        );
        tables.insert(
            SliceName::TrafficLights,
            ColumnarTable::new()
                .with_column("intersection_id", intersections.to_vec())
                .with_column("state", lights.to_vec()),
        );
        tables.insert(
            SliceName::Vehicles,
            ColumnarTable::new()
                .with_column("vehicle_id", vehicle_ids)
                .with_column("road", vehicle_roads.to_vec())
                .with_column("position", vec![0.0; vehicle_roads.len()])
                .with_column("speed", vec![20.0; vehicle_roads.len()]),
        );
        tables.insert(
            SliceName::RoadBlockages,
            ColumnarTable::new()
                .with_column("road_id", roads.to_vec())
                .with_column("blocked", vec![false; roads.len()]),
        );
        Self { name, tables }
    }

    /// Replaces every light with `state`.
    pub fn with_all_lights(mut self, state: &str) -> Self {
        if let Some(lights) = self.tables.remove(&SliceName::TrafficLights) {
            let rows = lights.rows();
            self.tables
                .insert(SliceName::TrafficLights, lights.with_column("state", vec![state; rows]));
        }
        self
    }

    /// Uploads the tables under `prefix` and returns the bundle reference.
    pub async fn upload<S: BlobStore + ?Sized>(&self, store: &S, prefix: &str) -> Result<BundleRef, CoreError> {
        upload_bundle(store, prefix, &self.tables).await
    }
}
