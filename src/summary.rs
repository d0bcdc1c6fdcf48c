//! Summaries built from bulk cost matrices and from stored route files.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::ThreadPool;
use rayon::prelude::*;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ColumnRename;
use crate::cost::CostAttribute;
use crate::enrichment::EnrichmentCache;
use crate::error::AnalysisError;
use crate::model::{
    AVG_WALKING_DISTANCE_WALKING_TIME, COST_ATTRIBUTE, CollectionExt, CostSummaryMap,
    EUCLIDEAN_DISTANCE_WALKING_TIME, Feature, FeatureCollection, FeatureExt, Geometry,
    PARKING_TIME, PathFeatureCollection, Properties, Role, number, value_text,
};
use crate::resolver::{Resolution, trip_end_properties};
use crate::traits::CoordinateTransform;

/// Property holding the door-to-door travel time of a summary feature.
pub const TOTAL_TRAVEL_TIME: &str = "total_travel_time";

/// Segment properties that identify a segment rather than measure it.
const NON_ADDITIVE: [&str; 3] = ["id", "direction", "seq"];

/// Joins a cost matrix with the enrichment of both trip ends.
pub struct SummaryAssembler<'a> {
    pub enrichment: &'a EnrichmentCache,
    pub transform: &'a dyn CoordinateTransform,
    pub pool: &'a ThreadPool,
}

impl SummaryAssembler<'_> {
    /// One feature per `origin x destination` pair present in `costs`. Pairs
    /// without a cost entry are logged and left out, and so are pairs whose
    /// ends are the same input point.
    pub fn assemble(
        &self,
        origins: &[Resolution],
        destinations: &[Resolution],
        costs: &CostSummaryMap,
        cost: CostAttribute,
    ) -> Result<Vec<Feature>, AnalysisError> {
        let merged: Vec<Option<Feature>> = self.pool.install(|| {
            origins
                .par_iter()
                .flat_map(|o| destinations.par_iter().map(move |d| (o, d)))
                .map(|(origin, destination)| self.pair_feature(origin, destination, costs, cost))
                .collect::<Result<Vec<_>, AnalysisError>>()
        })?;
        let features: Vec<Feature> = merged.into_iter().flatten().collect();
        debug!(
            features = features.len(),
            pairs = origins.len() * destinations.len(),
            "assembled cost summary"
        );
        Ok(features)
    }

    fn pair_feature(
        &self,
        origin: &Resolution,
        destination: &Resolution,
        costs: &CostSummaryMap,
        cost: CostAttribute,
    ) -> Result<Option<Feature>, AnalysisError> {
        if origin.same_point(destination, self.transform)? {
            debug!(vertex = %origin.vertex_id, "origin and destination coincide, pair skipped");
            return Ok(None);
        }
        let Some(entry) = costs.get(origin.vertex_id, destination.vertex_id) else {
            warn!(
                origin = %origin.vertex_id,
                destination = %destination.vertex_id,
                "no cost between vertices, pair skipped"
            );
            return Ok(None);
        };

        let mut properties = entry.extra.clone();
        properties.insert(COST_ATTRIBUTE.to_string(), json!(cost.english_name()));
        properties.insert(cost.english_name().to_string(), json!(entry.total_cost));
        properties.extend(
            self.enrichment
                .insert_additional_properties(&origin.feature, &destination.feature)?,
        );
        properties.extend(trip_end_properties(origin, destination));
        Ok(Some(Feature::with_properties(entry.geometry.clone(), properties)))
    }
}

/// Walking, parking and network time of one trip, in network cost units.
pub fn total_travel_time(properties: &Properties, cost: CostAttribute) -> Result<f64, AnalysisError> {
    let keys = [
        Role::Origin.key(EUCLIDEAN_DISTANCE_WALKING_TIME),
        Role::Origin.key(AVG_WALKING_DISTANCE_WALKING_TIME),
        cost.english_name().to_string(),
        Role::Destination.key(PARKING_TIME),
        Role::Destination.key(AVG_WALKING_DISTANCE_WALKING_TIME),
        Role::Destination.key(EUCLIDEAN_DISTANCE_WALKING_TIME),
    ];
    keys.iter().try_fold(0.0, |sum, key| {
        properties
            .get(key)
            .and_then(number)
            .map(|value| sum + value)
            .ok_or_else(|| AnalysisError::MissingProperty { key: key.clone() })
    })
}

/// Rows of exported columns, in `columns` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn write_csv(&self, path: &Path, delimiter: u8) -> Result<(), AnalysisError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AnalysisError::io(parent, e))?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(|e| AnalysisError::io(path, e))?;
        Ok(())
    }
}

/// Keep only the configured columns, renamed to their exported names.
pub fn rename_and_subset(
    features: &[Feature],
    columns: &[ColumnRename],
) -> Result<Table, AnalysisError> {
    let header = columns.iter().map(|c| c.to.clone()).collect();
    let rows = features
        .iter()
        .map(|feature| {
            columns
                .iter()
                .map(|column| {
                    feature
                        .property(&column.from)
                        .map(value_text)
                        .ok_or_else(|| AnalysisError::MissingProperty {
                            key: column.from.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Table { header, rows })
}

/// One feature per stored route: every measured segment property summed,
/// the overall properties carried over, and a geometry made of the first
/// and last segments.
pub fn create_detailed_summary(routes_dir: &Path) -> Result<FeatureCollection, AnalysisError> {
    let mut files: Vec<PathBuf> = fs::read_dir(routes_dir)
        .map_err(|e| AnalysisError::io(routes_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "geojson"))
        .collect();
    files.sort();

    let mut features = Vec::with_capacity(files.len());
    for path in &files {
        let text = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        let route: PathFeatureCollection = serde_json::from_str(&text)?;
        features.push(summarise_route(route));
    }
    Ok(FeatureCollection::from_features(features))
}

fn summarise_route(route: PathFeatureCollection) -> Feature {
    let mut properties = route.overall_properties;
    let mut first: Option<&Feature> = None;
    let mut last: Option<(i64, &Feature)> = None;

    for segment in &route.features {
        let seq = segment.property("seq").and_then(Value::as_i64);
        if seq == Some(1) {
            first = Some(segment);
        }
        if let Some(seq) = seq {
            if last.is_none_or(|(max, _)| seq > max) {
                last = Some((seq, segment));
            }
        }
        for (key, value) in segment.properties.iter().flatten() {
            if NON_ADDITIVE.contains(&key.as_str()) {
                continue;
            }
            let Some(value) = value.as_f64() else {
                continue;
            };
            let total = properties.get(key).and_then(Value::as_f64).unwrap_or(0.0) + value;
            properties.insert(key.clone(), json!(total));
        }
    }

    let mut coordinates = first.map(line_coordinates).unwrap_or_default();
    if let Some((seq, segment)) = last {
        if seq > 1 {
            coordinates.extend(line_coordinates(segment));
        }
    }
    let geometry = Geometry::new(geojson::Value::LineString(coordinates));
    Feature::with_properties(Some(geometry), properties)
}

fn line_coordinates(segment: &Feature) -> Vec<Vec<f64>> {
    match segment.geometry.as_ref().map(|g| &g.value) {
        Some(geojson::Value::LineString(line)) => line.clone(),
        Some(geojson::Value::MultiLineString(lines)) => lines.concat(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::write_geojson;

    fn column(from: &str, to: &str) -> ColumnRename {
        ColumnRename {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn trip_properties() -> Properties {
        let mut properties = Properties::new();
        for (key, value) in [
            ("startPoint_EuclideanDistanceWalkingTime", 1.0),
            ("startPoint_AVGWalkingDistanceWalkingTime", 2.0),
            ("fast_time", 30.0),
            ("endPoint_ParkingTime", 0.5),
            ("endPoint_AVGWalkingDistanceWalkingTime", 2.0),
            ("endPoint_EuclideanDistanceWalkingTime", 1.5),
        ] {
            properties.insert(key.into(), json!(value));
        }
        properties
    }

    #[test]
    fn test_total_travel_time_sums_all_legs() {
        let total = total_travel_time(&trip_properties(), CostAttribute::BicycleFastTime).unwrap();
        assert_eq!(total, 37.0);
    }

    #[test]
    fn test_total_travel_time_needs_every_leg() {
        let err = total_travel_time(&trip_properties(), CostAttribute::Distance).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingProperty { ref key } if key == "distance"));
    }

    #[test]
    fn test_rename_and_subset() {
        let mut properties = trip_properties();
        properties.insert("startPoint_id".into(), json!(0));
        properties.insert("endPoint_id".into(), json!("38"));
        properties.insert(TOTAL_TRAVEL_TIME.into(), json!(37.0));
        let features = vec![Feature::with_properties(None, properties)];

        let table = rename_and_subset(
            &features,
            &[
                column("startPoint_id", "ykr_from_id"),
                column("endPoint_id", "ykr_to_id"),
                column(TOTAL_TRAVEL_TIME, "travel_time"),
            ],
        )
        .unwrap();

        assert_eq!(table.header, vec!["ykr_from_id", "ykr_to_id", "travel_time"]);
        assert_eq!(table.rows, vec![vec!["0", "38", "37.0"]]);
    }

    #[test]
    fn test_detailed_summary_sums_segments() {
        let dir = tempfile::tempdir().unwrap();
        let segment = |seq: i64, distance: f64, coords: Vec<Vec<f64>>| {
            let mut properties = Properties::new();
            properties.insert("id".into(), json!(100 + seq));
            properties.insert("seq".into(), json!(seq));
            properties.insert("direction".into(), json!(1));
            properties.insert("distance".into(), json!(distance));
            properties.insert("name".into(), json!("street"));
            let geometry = Geometry::new(geojson::Value::LineString(coords));
            Feature::with_properties(Some(geometry), properties)
        };
        let mut route = PathFeatureCollection::new(vec![
            segment(1, 10.0, vec![vec![0.0, 0.0], vec![1.0, 0.0]]),
            segment(2, 5.0, vec![vec![1.0, 0.0], vec![2.0, 0.0]]),
            segment(3, 2.5, vec![vec![2.0, 0.0], vec![3.0, 0.0]]),
        ]);
        route
            .overall_properties
            .insert("startPoint_id".into(), json!(0));
        write_geojson(&dir.path().join("shortestPath-distance-0-1.geojson"), &route).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let summary = create_detailed_summary(dir.path()).unwrap();
        assert_eq!(summary.features.len(), 1);
        let feature = &summary.features[0];
        assert_eq!(feature.property("distance"), Some(&json!(17.5)));
        assert_eq!(feature.property("startPoint_id"), Some(&json!(0)));
        assert!(feature.property("seq").is_none());
        assert_eq!(
            feature.geometry.as_ref().map(|g| &g.value),
            Some(&geojson::Value::LineString(vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![2.0, 0.0],
                vec![3.0, 0.0]
            ]))
        );
    }
}
