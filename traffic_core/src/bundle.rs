//! Bootstrap bundle protocol.
//!
//! A bundle maps logical slice names to blob locations. Every process
//! resolves the same bundle independently and decodes the slices it needs.
//! Slices are columnar tables, `{"columns": {"<name>": [v0, v1, ...]}}`,
//! indexed by the slice's natural key.

use crate::error::{BootstrapError, CoreError};
use crate::model::{
    Intersection, IntersectionId, LightState, Point, Road, RoadId, VehicleId, VehiclePosition,
    WorldState,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};
use traffic_env::{BlobRef, BlobStore};

/// Logical slice of the bootstrap bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceName {
    Intersections,
    Roads,
    TrafficLights,
    Vehicles,
    RoadBlockages,
}

impl SliceName {
    /// All slices, in decode order.
    pub fn all() -> [SliceName; 5] {
        [
            SliceName::Intersections,
            SliceName::Roads,
            SliceName::TrafficLights,
            SliceName::Vehicles,
            SliceName::RoadBlockages,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SliceName::Intersections => "intersections",
            SliceName::Roads => "roads",
            SliceName::TrafficLights => "traffic_lights",
            SliceName::Vehicles => "vehicles",
            SliceName::RoadBlockages => "road_blockages",
        }
    }

    /// Natural key column.
    pub fn key_column(&self) -> &'static str {
        match self {
            SliceName::Intersections | SliceName::TrafficLights => "intersection_id",
            SliceName::Roads | SliceName::RoadBlockages => "road_id",
            SliceName::Vehicles => "vehicle_id",
        }
    }
}

impl fmt::Display for SliceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Slice name → blob location. Supplied identically to every process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleRef(BTreeMap<SliceName, BlobRef>);

impl BundleRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slice: SliceName, location: BlobRef) -> Self {
        self.0.insert(slice, location);
        self
    }

    pub fn insert(&mut self, slice: SliceName, location: BlobRef) {
        self.0.insert(slice, location);
    }

    pub fn get(&self, slice: SliceName) -> Option<&BlobRef> {
        self.0.get(&slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SliceName, &BlobRef)> {
        self.0.iter()
    }
}

/// A columnar table: named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnarTable {
    columns: BTreeMap<String, Vec<Value>>,
}

impl ColumnarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a column.
    pub fn with_column<T: Into<Value>>(mut self, name: &str, values: Vec<T>) -> Self {
        self.columns
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Parses and checks that all columns have the same length.
    pub fn from_bytes(slice: SliceName, bytes: &[u8]) -> Result<Self, BootstrapError> {
        let table: ColumnarTable = serde_json::from_slice(bytes)
            .map_err(|e| BootstrapError::decode(slice, e.to_string()))?;
        table.check_shape(slice)?;
        Ok(table)
    }

    /// Fails unless every column has the same number of rows.
    pub fn check_shape(&self, slice: SliceName) -> Result<(), BootstrapError> {
        let mut lengths = self.columns.iter().map(|(name, col)| (name, col.len()));
        if let Some((first_name, expected)) = lengths.next() {
            for (name, len) in lengths {
                if len != expected {
                    return Err(BootstrapError::decode(
                        slice,
                        format!(
                            "column '{}' has {} rows, '{}' has {}",
                            name, len, first_name, expected
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn rows(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn column(&self, slice: SliceName, name: &str) -> Result<&[Value], BootstrapError> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| BootstrapError::decode(slice, format!("missing column '{}'", name)))
    }

    fn strings(&self, slice: SliceName, name: &str) -> Result<Vec<String>, BootstrapError> {
        self.column(slice, name)?
            .iter()
            .enumerate()
            .map(|(row, v)| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(BootstrapError::decode(
                    slice,
                    format!("column '{}' row {}: expected string, got {}", name, row, other),
                )),
            })
            .collect()
    }

    fn floats(&self, slice: SliceName, name: &str) -> Result<Vec<f64>, BootstrapError> {
        self.optional_floats(slice, name)?
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.ok_or_else(|| {
                    BootstrapError::decode(slice, format!("column '{}' row {} is null", name, row))
                })
            })
            .collect()
    }

    /// Absent column or `null` cells decode as `None`.
    fn optional_floats(&self, slice: SliceName, name: &str) -> Result<Vec<Option<f64>>, BootstrapError> {
        let Some(col) = self.columns.get(name) else {
            return Ok(vec![None; self.rows()]);
        };
        col.iter()
            .enumerate()
            .map(|(row, v)| match v {
                Value::Null => Ok(None),
                Value::Number(n) => Ok(n.as_f64()),
                other => Err(BootstrapError::decode(
                    slice,
                    format!("column '{}' row {}: expected number, got {}", name, row, other),
                )),
            })
            .collect()
    }

    fn bools(&self, slice: SliceName, name: &str) -> Result<Vec<bool>, BootstrapError> {
        self.column(slice, name)?
            .iter()
            .enumerate()
            .map(|(row, v)| {
                v.as_bool().ok_or_else(|| {
                    BootstrapError::decode(
                        slice,
                        format!("column '{}' row {}: expected bool, got {}", name, row, v),
                    )
                })
            })
            .collect()
    }
}

/// Initial state of a road blockage as shipped in the bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockageSeed {
    pub blocked: bool,
    /// Ticks until an active blockage clears
    pub remaining_ticks: u32,
}

/// Per-field defaults for optional columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleDefaults {
    pub vehicle_speed: f64,
    pub blockage_ticks: u32,
}

impl Default for BundleDefaults {
    fn default() -> Self {
        Self {
            vehicle_speed: 20.0,
            blockage_ticks: 10,
        }
    }
}

/// Decoded bundle. Slices that were not requested stay empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    pub intersections: BTreeMap<IntersectionId, Intersection>,
    pub roads: BTreeMap<RoadId, Road>,
    pub traffic_lights: BTreeMap<IntersectionId, LightState>,
    pub vehicles: BTreeMap<VehicleId, VehiclePosition>,
    pub blockages: BTreeMap<RoadId, BlockageSeed>,
}

impl Bundle {
    /// Downloads and decodes `slices` from the store.
    ///
    /// Any missing or undecodable slice is fatal: the bundle defines the
    /// topology of the whole simulation.
    pub async fn load<S>(
        store: &S,
        bundle: &BundleRef,
        slices: &[SliceName],
        defaults: &BundleDefaults,
    ) -> Result<Bundle, BootstrapError>
    where
        S: BlobStore + ?Sized,
    {
        let mut tables = BTreeMap::new();
        for &slice in slices {
            let location = bundle.get(slice).ok_or(BootstrapError::MissingSlice(slice))?;
            debug!("Fetching slice {} from {}", slice, location);
            let bytes = store
                .get(location)
                .await
                .map_err(|source| BootstrapError::Fetch { slice, source })?;
            tables.insert(slice, ColumnarTable::from_bytes(slice, &bytes)?);
        }

        let decoded = Self::decode(&tables, defaults)?;
        info!(
            "Loaded bundle: {} intersections, {} roads, {} lights, {} vehicles, {} blockages",
            decoded.intersections.len(),
            decoded.roads.len(),
            decoded.traffic_lights.len(),
            decoded.vehicles.len(),
            decoded.blockages.len()
        );
        Ok(decoded)
    }

    /// Decodes already-parsed tables, validating cross-slice references.
    pub fn decode(
        tables: &BTreeMap<SliceName, ColumnarTable>,
        defaults: &BundleDefaults,
    ) -> Result<Bundle, BootstrapError> {
        for (slice, table) in tables {
            table.check_shape(*slice)?;
        }
        let require = |slice: SliceName| tables.get(&slice).ok_or(BootstrapError::MissingSlice(slice));
        let mut bundle = Bundle::default();

        let wants = |slice: SliceName| tables.contains_key(&slice);
        let needs_intersections = wants(SliceName::Intersections)
            || wants(SliceName::Roads)
            || wants(SliceName::TrafficLights);
        let needs_roads =
            wants(SliceName::Roads) || wants(SliceName::Vehicles) || wants(SliceName::RoadBlockages);

        if needs_intersections {
            bundle.intersections = decode_intersections(require(SliceName::Intersections)?)?;
        }
        if needs_roads {
            bundle.roads = decode_roads(require(SliceName::Roads)?, &bundle.intersections)?;
        }
        if let Some(table) = tables.get(&SliceName::TrafficLights) {
            bundle.traffic_lights = decode_lights(table, &bundle.intersections)?;
        }
        if let Some(table) = tables.get(&SliceName::Vehicles) {
            bundle.vehicles = decode_vehicles(table, &bundle.roads, defaults.vehicle_speed)?;
        }
        if let Some(table) = tables.get(&SliceName::RoadBlockages) {
            bundle.blockages = decode_blockages(table, &bundle.roads, defaults.blockage_ticks)?;
        }
        Ok(bundle)
    }

    /// Builds the canonical world state at tick 0.
    pub fn into_world_state(self) -> WorldState {
        let mut world = WorldState::default();
        world.blockages = self
            .blockages
            .iter()
            .map(|(road, seed)| (road.clone(), seed.blocked))
            .collect();
        world.intersections = self.intersections;
        world.roads = self.roads;
        world.traffic_lights = self.traffic_lights;
        world.vehicles = self.vehicles;
        world
    }
}

/// Encodes tables and stores them under `prefix`, returning the bundle reference.
pub async fn upload_bundle<S>(
    store: &S,
    prefix: &str,
    tables: &BTreeMap<SliceName, ColumnarTable>,
) -> Result<BundleRef, CoreError>
where
    S: BlobStore + ?Sized,
{
    let mut bundle = BundleRef::new();
    for (slice, table) in tables {
        let name = format!("{}/{}.json", prefix, slice);
        let location = store.put(&name, table.to_bytes()?).await?;
        bundle.insert(*slice, location);
    }
    Ok(bundle)
}

fn insert_unique<K: Ord + fmt::Display, V>(
    map: &mut BTreeMap<K, V>,
    slice: SliceName,
    key: K,
    value: V,
) -> Result<(), BootstrapError> {
    if map.contains_key(&key) {
        return Err(BootstrapError::invalid(slice, format!("duplicate key '{}'", key)));
    }
    map.insert(key, value);
    Ok(())
}

fn decode_intersections(
    table: &ColumnarTable,
) -> Result<BTreeMap<IntersectionId, Intersection>, BootstrapError> {
    let slice = SliceName::Intersections;
    let ids = table.strings(slice, slice.key_column())?;
    let xs = table.floats(slice, "x")?;
    let ys = table.floats(slice, "y")?;

    let mut out = BTreeMap::new();
    for ((id, x), y) in ids.into_iter().zip(xs).zip(ys) {
        let id = IntersectionId::new(id);
        let intersection = Intersection {
            id: id.clone(),
            location: Point::new(x, y),
        };
        insert_unique(&mut out, slice, id, intersection)?;
    }
    Ok(out)
}

fn decode_roads(
    table: &ColumnarTable,
    intersections: &BTreeMap<IntersectionId, Intersection>,
) -> Result<BTreeMap<RoadId, Road>, BootstrapError> {
    let slice = SliceName::Roads;
    let ids = table.strings(slice, slice.key_column())?;
    let starts = table.strings(slice, "start")?;
    let ends = table.strings(slice, "end")?;
    let lengths = table.floats(slice, "length")?;
    let limits = table.floats(slice, "speed_limit")?;
    let start_x = table.optional_floats(slice, "start_x")?;
    let start_y = table.optional_floats(slice, "start_y")?;
    let end_x = table.optional_floats(slice, "end_x")?;
    let end_y = table.optional_floats(slice, "end_y")?;

    let locate = |id: &IntersectionId, road: &str| {
        intersections.get(id).map(|i| i.location).ok_or_else(|| {
            BootstrapError::invalid(slice, format!("road '{}' references unknown intersection '{}'", road, id))
        })
    };

    let mut out = BTreeMap::new();
    for row in 0..ids.len() {
        let id = RoadId::new(ids[row].clone());
        let start = IntersectionId::new(starts[row].clone());
        let end = IntersectionId::new(ends[row].clone());
        if lengths[row] <= 0.0 || !lengths[row].is_finite() {
            return Err(BootstrapError::invalid(slice, format!("road '{}' has length {}", id, lengths[row])));
        }
        if limits[row] <= 0.0 || !limits[row].is_finite() {
            return Err(BootstrapError::invalid(slice, format!("road '{}' has speed limit {}", id, limits[row])));
        }

        let derived_start = locate(&start, id.as_str())?;
        let derived_end = locate(&end, id.as_str())?;
        let road = Road {
            id: id.clone(),
            start,
            end,
            length: lengths[row],
            speed_limit: limits[row],
            start_point: Point::new(
                start_x[row].unwrap_or(derived_start.x),
                start_y[row].unwrap_or(derived_start.y),
            ),
            end_point: Point::new(
                end_x[row].unwrap_or(derived_end.x),
                end_y[row].unwrap_or(derived_end.y),
            ),
        };
        insert_unique(&mut out, slice, id, road)?;
    }
    Ok(out)
}

fn decode_lights(
    table: &ColumnarTable,
    intersections: &BTreeMap<IntersectionId, Intersection>,
) -> Result<BTreeMap<IntersectionId, LightState>, BootstrapError> {
    let slice = SliceName::TrafficLights;
    let ids = table.strings(slice, slice.key_column())?;
    let states = table.strings(slice, "state")?;

    let mut out = BTreeMap::new();
    for (id, state) in ids.into_iter().zip(states) {
        let id = IntersectionId::new(id);
        if !intersections.contains_key(&id) {
            return Err(BootstrapError::invalid(slice, format!("light at unknown intersection '{}'", id)));
        }
        let state: LightState = state.parse().map_err(|e: String| BootstrapError::invalid(slice, e))?;
        insert_unique(&mut out, slice, id, state)?;
    }
    Ok(out)
}

fn decode_vehicles(
    table: &ColumnarTable,
    roads: &BTreeMap<RoadId, Road>,
    default_speed: f64,
) -> Result<BTreeMap<VehicleId, VehiclePosition>, BootstrapError> {
    let slice = SliceName::Vehicles;
    let ids = table.strings(slice, slice.key_column())?;
    let road_ids = table.strings(slice, "road")?;
    let positions = table.optional_floats(slice, "position")?;
    let speeds = table.optional_floats(slice, "speed")?;

    let mut out = BTreeMap::new();
    for row in 0..ids.len() {
        let vehicle_id = VehicleId::new(ids[row].clone());
        let road_id = RoadId::new(road_ids[row].clone());
        let road = roads.get(&road_id).ok_or_else(|| {
            BootstrapError::invalid(slice, format!("vehicle '{}' on unknown road '{}'", vehicle_id, road_id))
        })?;

        let position = positions[row].unwrap_or(0.0);
        if !(0.0..road.length).contains(&position) {
            return Err(BootstrapError::invalid(
                slice,
                format!("vehicle '{}' position {} outside [0, {})", vehicle_id, position, road.length),
            ));
        }
        let speed = speeds[row].unwrap_or(default_speed);
        if speed < 0.0 || !speed.is_finite() {
            return Err(BootstrapError::invalid(slice, format!("vehicle '{}' has speed {}", vehicle_id, speed)));
        }

        let vehicle = VehiclePosition {
            vehicle_id: vehicle_id.clone(),
            road: road_id,
            position,
            speed,
        };
        insert_unique(&mut out, slice, vehicle_id, vehicle)?;
    }
    Ok(out)
}

fn decode_blockages(
    table: &ColumnarTable,
    roads: &BTreeMap<RoadId, Road>,
    default_ticks: u32,
) -> Result<BTreeMap<RoadId, BlockageSeed>, BootstrapError> {
    let slice = SliceName::RoadBlockages;
    let ids = table.strings(slice, slice.key_column())?;
    let blocked = table.bools(slice, "blocked")?;
    let remaining = table.optional_floats(slice, "remaining_ticks")?;

    let mut out = BTreeMap::new();
    for row in 0..ids.len() {
        let road = RoadId::new(ids[row].clone());
        if !roads.contains_key(&road) {
            return Err(BootstrapError::invalid(slice, format!("blockage on unknown road '{}'", road)));
        }
        let remaining_ticks = match remaining[row] {
            Some(n) if n >= 1.0 => n as u32,
            Some(n) if blocked[row] => {
                return Err(BootstrapError::invalid(slice, format!("road '{}' blocked for {} ticks", road, n)))
            }
            _ => default_ticks,
        };
        let seed = BlockageSeed {
            blocked: blocked[row],
            remaining_ticks,
        };
        insert_unique(&mut out, slice, road, seed)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> BTreeMap<SliceName, ColumnarTable> {
        let mut tables = BTreeMap::new();
        tables.insert(
            SliceName::Intersections,
            ColumnarTable::new()
                .with_column("intersection_id", vec!["A", "B", "C"])
                .with_column("x", vec![0.0, 1.0, 0.0])
                .with_column("y", vec![0.0, 0.0, 1.0]),
        );
        tables.insert(
            SliceName::Roads,
            ColumnarTable::new()
                .with_column("road_id", vec!["A-B", "A-C", "B-C"])
                .with_column("start", vec!["A", "A", "B"])
                .with_column("end", vec!["B", "C", "C"])
                .with_column("length", vec![1.0, 1.0, 1.41])
                .with_column("speed_limit", vec![50.0, 50.0, 40.0]),
        );
        tables.insert(
            SliceName::TrafficLights,
            ColumnarTable::new()
                .with_column("intersection_id", vec!["A", "B", "C"])
                .with_column("state", vec!["green", "red", "yellow"]),
        );
        tables.insert(
            SliceName::Vehicles,
            ColumnarTable::new()
                .with_column("vehicle_id", vec!["v0", "v1"])
                .with_column("road", vec!["A-B", "B-C"]),
        );
        tables.insert(
            SliceName::RoadBlockages,
            ColumnarTable::new()
                .with_column("road_id", vec!["A-B", "A-C", "B-C"])
                .with_column("blocked", vec![false, true, false]),
        );
        tables
    }

    #[test]
    fn test_decode_full_bundle() {
        let bundle = Bundle::decode(&triangle(), &BundleDefaults::default()).unwrap();

        assert_eq!(bundle.intersections.len(), 3);
        assert_eq!(bundle.roads.len(), 3);
        assert_eq!(bundle.traffic_lights[&IntersectionId::from("C")], LightState::Yellow);

        // coordinates derived from intersections
        let bc = &bundle.roads[&RoadId::from("B-C")];
        assert_eq!(bc.start_point, Point::new(1.0, 0.0));
        assert_eq!(bc.end_point, Point::new(0.0, 1.0));

        // defaults for optional columns
        let v0 = &bundle.vehicles[&VehicleId::from("v0")];
        assert_eq!(v0.position, 0.0);
        assert_eq!(v0.speed, 20.0);

        let ac = bundle.blockages[&RoadId::from("A-C")];
        assert!(ac.blocked);
        assert_eq!(ac.remaining_ticks, BundleDefaults::default().blockage_ticks);
    }

    #[test]
    fn test_into_world_state() {
        let world = Bundle::decode(&triangle(), &BundleDefaults::default())
            .unwrap()
            .into_world_state();
        assert_eq!(world.tick(), 0);
        assert_eq!(world.vehicles.len(), 2);
        assert_eq!(world.blockages[&RoadId::from("A-C")], true);
        assert_eq!(world.blockages[&RoadId::from("A-B")], false);
    }

    #[test]
    fn test_missing_dependency_slice() {
        let mut tables = triangle();
        tables.remove(&SliceName::Intersections);
        let err = Bundle::decode(&tables, &BundleDefaults::default()).unwrap_err();
        assert!(matches!(err, BootstrapError::MissingSlice(SliceName::Intersections)));
    }

    #[test]
    fn test_rejects_non_positive_length() {
        let mut tables = triangle();
        let roads = tables.remove(&SliceName::Roads).unwrap().with_column("length", vec![1.0, 0.0, 1.41]);
        tables.insert(SliceName::Roads, roads);
        let err = Bundle::decode(&tables, &BundleDefaults::default()).unwrap_err();
        assert!(matches!(err, BootstrapError::Invalid { slice: SliceName::Roads, .. }));
    }

    #[test]
    fn test_rejects_vehicle_on_unknown_road() {
        let mut tables = triangle();
        tables.insert(
            SliceName::Vehicles,
            ColumnarTable::new()
                .with_column("vehicle_id", vec!["v0"])
                .with_column("road", vec!["Z-Z"]),
        );
        let err = Bundle::decode(&tables, &BundleDefaults::default()).unwrap_err();
        assert!(matches!(err, BootstrapError::Invalid { slice: SliceName::Vehicles, .. }));
    }

    #[test]
    fn test_ragged_columns_are_undecodable() {
        let raw = br#"{"columns":{"intersection_id":["A","B"],"x":[0.0],"y":[0.0,1.0]}}"#;
        let err = ColumnarTable::from_bytes(SliceName::Intersections, raw).unwrap_err();
        assert!(matches!(err, BootstrapError::Decode { .. }));
    }

    #[test]
    fn test_ragged_built_table_is_rejected_by_decode() {
        let mut tables = triangle();
        tables.insert(
            SliceName::Vehicles,
            ColumnarTable::new()
                .with_column("vehicle_id", vec!["v0", "v1", "v2"])
                .with_column("road", vec!["A-B"])
                .with_column("speed", vec![10.0, 12.0]),
        );
        let err = Bundle::decode(&tables, &BundleDefaults::default()).unwrap_err();
        assert!(matches!(err, BootstrapError::Decode { slice: SliceName::Vehicles, .. }));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut tables = triangle();
        tables.insert(
            SliceName::Intersections,
            ColumnarTable::new()
                .with_column("intersection_id", vec!["A", "A", "B", "C"])
                .with_column("x", vec![0.0, 0.0, 1.0, 0.0])
                .with_column("y", vec![0.0, 0.0, 0.0, 1.0]),
        );
        assert!(Bundle::decode(&tables, &BundleDefaults::default()).is_err());
    }

    #[test]
    fn test_partial_request_leaves_other_slices_empty() {
        let mut tables = triangle();
        tables.remove(&SliceName::TrafficLights);
        tables.remove(&SliceName::RoadBlockages);
        let bundle = Bundle::decode(&tables, &BundleDefaults::default()).unwrap();
        assert_eq!(bundle.vehicles.len(), 2);
        assert!(bundle.traffic_lights.is_empty());
        assert!(bundle.blockages.is_empty());
    }

    #[test]
    fn test_bundle_ref_serde() {
        let bundle = BundleRef::new()
            .with(SliceName::Roads, BlobRef::new("b/roads.json"))
            .with(SliceName::TrafficLights, BlobRef::new("b/traffic_lights.json"));
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["traffic_lights"], "b/traffic_lights.json");
        let back: BundleRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }
}
