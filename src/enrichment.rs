//! Per-point enrichment: the ordered operations that turn a resolved
//! feature into the role-prefixed property bag a trip summary reads.
//!
//! The operation list is fixed at construction. Order matters:
//! transference runs before anything reading the prefixed copies, and the
//! euclidean distance is computed before the walking time that consumes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tracing::debug;

use crate::cache::KeyedCache;
use crate::config::{AnalysisConfig, ParkingConfig, WalkingConfig};
use crate::error::AnalysisError;
use crate::geodesy::{calculate_time, euclidean_distance};
use crate::model::{
    AVG_WALKING_DISTANCE, AVG_WALKING_DISTANCE_WALKING_TIME, COORDINATES_CRS, Crs,
    EUCLIDEAN_DISTANCE, EUCLIDEAN_DISTANCE_WALKING_TIME, Feature, FeatureExt,
    NEAREST_VERTEX_COORDINATES, PARKING_TIME, Point, Properties, Role, SELECTED_POINT_COORDINATES,
    coordinate_pair, number,
};
use crate::traits::CoordinateTransform;

/// One enrichment step. Returns only the keys it adds.
pub trait EnrichmentOperation: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, feature: &Feature, prefix: &str) -> Result<Properties, AnalysisError>;
}

/// Copies every property not yet carrying `prefix` under `prefix + key`.
#[derive(Debug, Default)]
pub struct PropertyTransference;

impl EnrichmentOperation for PropertyTransference {
    fn name(&self) -> &'static str {
        "property transference"
    }

    fn run(&self, feature: &Feature, prefix: &str) -> Result<Properties, AnalysisError> {
        Ok(feature
            .properties
            .iter()
            .flatten()
            .filter(|(key, _)| !key.starts_with(prefix))
            .map(|(key, value)| (format!("{prefix}{key}"), value.clone()))
            .collect())
    }
}

/// Straight-line distance between the input point and its snapped vertex.
pub struct EuclideanDistance {
    transform: Arc<dyn CoordinateTransform>,
}

impl EuclideanDistance {
    pub fn new(transform: Arc<dyn CoordinateTransform>) -> Self {
        Self { transform }
    }

    fn wgs84(&self, feature: &Feature, key: &str, crs: &Crs) -> Result<Point, AnalysisError> {
        let (lng, lat) = feature
            .property(key)
            .and_then(coordinate_pair)
            .ok_or_else(|| missing(key))?;
        Ok(self
            .transform
            .transform(&Point::new(lat, lng, crs.clone()), &Crs::wgs84())?)
    }
}

impl EnrichmentOperation for EuclideanDistance {
    fn name(&self) -> &'static str {
        "euclidean distance"
    }

    fn run(&self, feature: &Feature, prefix: &str) -> Result<Properties, AnalysisError> {
        let crs = feature
            .property(COORDINATES_CRS)
            .and_then(Value::as_str)
            .and_then(Crs::parse)
            .ok_or_else(|| missing(COORDINATES_CRS))?;
        let selected = self.wgs84(feature, SELECTED_POINT_COORDINATES, &crs)?;
        let nearest = self.wgs84(feature, NEAREST_VERTEX_COORDINATES, &crs)?;
        let distance = euclidean_distance(
            (selected.lat(), selected.lng()),
            (nearest.lat(), nearest.lng()),
        );

        let mut out = Properties::new();
        out.insert(format!("{prefix}{EUCLIDEAN_DISTANCE}"), json!(distance));
        Ok(out)
    }
}

/// Walking time over the euclidean offset and over the average walking
/// distance to the network.
pub struct WalkingTime {
    config: WalkingConfig,
}

impl WalkingTime {
    pub fn new(config: WalkingConfig) -> Self {
        Self { config }
    }
}

impl EnrichmentOperation for WalkingTime {
    fn name(&self) -> &'static str {
        "walking time"
    }

    fn run(&self, feature: &Feature, prefix: &str) -> Result<Properties, AnalysisError> {
        let own_key = format!("{prefix}{EUCLIDEAN_DISTANCE}");
        let euclidean = feature
            .property_f64(&own_key)
            .or_else(|| {
                feature
                    .properties
                    .iter()
                    .flatten()
                    .find(|(key, _)| key.ends_with(EUCLIDEAN_DISTANCE))
                    .and_then(|(_, value)| number(value))
            })
            .ok_or_else(|| missing(&own_key))?;
        let walking_distance = feature
            .property_f64(&self.config.distance_attribute)
            .unwrap_or(self.config.default_distance);
        let speed = self.config.speed;

        let mut out = Properties::new();
        out.insert(
            format!("{prefix}{EUCLIDEAN_DISTANCE_WALKING_TIME}"),
            json!(calculate_time(euclidean, speed)),
        );
        out.insert(
            format!("{prefix}{AVG_WALKING_DISTANCE_WALKING_TIME}"),
            json!(calculate_time(walking_distance, speed)),
        );
        out.insert(
            format!("{prefix}{AVG_WALKING_DISTANCE}"),
            json!(walking_distance),
        );
        Ok(out)
    }
}

/// Time spent parking at the point.
pub struct ParkingTime {
    config: ParkingConfig,
}

impl ParkingTime {
    pub fn new(config: ParkingConfig) -> Self {
        Self { config }
    }
}

impl EnrichmentOperation for ParkingTime {
    fn name(&self) -> &'static str {
        "parking time"
    }

    fn run(&self, feature: &Feature, prefix: &str) -> Result<Properties, AnalysisError> {
        let time = feature
            .property_f64(&self.config.time_attribute)
            .unwrap_or(self.config.default_time);
        let mut out = Properties::new();
        out.insert(format!("{prefix}{PARKING_TIME}"), json!(time));
        Ok(out)
    }
}

fn missing(key: &str) -> AnalysisError {
    AnalysisError::MissingProperty {
        key: key.to_string(),
    }
}

/// Ordered list of enrichment operations.
pub struct EnrichmentPipeline {
    operations: Vec<Box<dyn EnrichmentOperation>>,
}

impl EnrichmentPipeline {
    pub fn new(operations: Vec<Box<dyn EnrichmentOperation>>) -> Self {
        Self { operations }
    }

    /// Transference, euclidean distance, walking time, parking time.
    pub fn standard(config: &AnalysisConfig, transform: Arc<dyn CoordinateTransform>) -> Self {
        Self::new(vec![
            Box::new(PropertyTransference),
            Box::new(EuclideanDistance::new(transform)),
            Box::new(WalkingTime::new(config.walking.clone())),
            Box::new(ParkingTime::new(config.parking.clone())),
        ])
    }

    pub fn operation_names(&self) -> Vec<&'static str> {
        self.operations.iter().map(|op| op.name()).collect()
    }

    /// Run every operation in order. Each one sees the keys written by the
    /// operations before it; the input feature is left untouched.
    pub fn run(&self, feature: &Feature, role: Role) -> Result<Properties, AnalysisError> {
        let prefix = role.prefix();
        let mut working = feature.clone();
        let mut bag = Properties::new();
        for operation in &self.operations {
            let added = operation.run(&working, prefix)?;
            for (key, value) in added {
                working.properties_mut().insert(key.clone(), value.clone());
                bag.insert(key, value);
            }
        }
        Ok(bag)
    }
}

/// Role-separated cache of pipeline output keyed by point identifier.
///
/// Every read returns an owned copy; mutating it never reaches the cache.
pub struct EnrichmentCache {
    pipeline: EnrichmentPipeline,
    point_identifier: String,
    origins: KeyedCache<String, Properties>,
    destinations: KeyedCache<String, Properties>,
    computations: AtomicUsize,
}

impl EnrichmentCache {
    pub fn new(pipeline: EnrichmentPipeline, point_identifier: impl Into<String>) -> Self {
        Self {
            pipeline,
            point_identifier: point_identifier.into(),
            origins: KeyedCache::new(),
            destinations: KeyedCache::new(),
            computations: AtomicUsize::new(0),
        }
    }

    pub fn get_or_compute(&self, feature: &Feature, role: Role) -> Result<Properties, AnalysisError> {
        let id = feature.identifier(&self.point_identifier)?;
        let cache = match role {
            Role::Origin => &self.origins,
            Role::Destination => &self.destinations,
        };
        cache.get_or_try_insert_with(&id, || {
            self.computations.fetch_add(1, Ordering::Relaxed);
            debug!(point = %id, %role, "running enrichment pipeline");
            self.pipeline.run(feature, role)
        })
    }

    /// Merged origin and destination bags for one trip.
    pub fn insert_additional_properties(
        &self,
        origin: &Feature,
        destination: &Feature,
    ) -> Result<Properties, AnalysisError> {
        let mut merged = self.get_or_compute(origin, Role::Origin)?;
        merged.extend(self.get_or_compute(destination, Role::Destination)?);
        Ok(merged)
    }

    /// Pipeline runs so far, across both roles.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::WebMercator;
    use crate::model::VERTEX_ID;

    fn resolved_feature(id: i64, nearest_lng: f64) -> Feature {
        let mut properties = Properties::new();
        properties.insert("id".into(), json!(id));
        properties.insert(VERTEX_ID.into(), json!(10 + id));
        properties.insert(SELECTED_POINT_COORDINATES.into(), json!([24.93, 60.18]));
        properties.insert(NEAREST_VERTEX_COORDINATES.into(), json!([nearest_lng, 60.18]));
        properties.insert(COORDINATES_CRS.into(), json!("EPSG:4326"));
        Feature::from_point(&Point::new(60.18, 24.93, Crs::wgs84()), properties)
    }

    fn pipeline() -> EnrichmentPipeline {
        EnrichmentPipeline::standard(&AnalysisConfig::default(), Arc::new(WebMercator))
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            pipeline().operation_names(),
            vec![
                "property transference",
                "euclidean distance",
                "walking time",
                "parking time"
            ]
        );
    }

    #[test]
    fn test_origin_bag_contents() {
        let bag = pipeline()
            .run(&resolved_feature(0, 24.931), Role::Origin)
            .unwrap();

        assert_eq!(bag.get("startPoint_id"), Some(&json!(0)));
        assert_eq!(bag.get("startPoint_vertex_id"), Some(&json!(10)));
        let distance = bag["startPoint_EuclideanDistance"].as_f64().unwrap();
        assert!((distance - 55.5).abs() < 0.1, "distance was {distance}");
        let walk = bag["startPoint_EuclideanDistanceWalkingTime"].as_f64().unwrap();
        assert!((walk - distance / 70.0).abs() < 1e-12);
        assert_eq!(bag["startPoint_AVGWalkingDistance"], json!(180.0));
        assert_eq!(
            bag["startPoint_AVGWalkingDistanceWalkingTime"].as_f64(),
            Some(180.0 / 70.0)
        );
        assert_eq!(bag["startPoint_ParkingTime"], json!(0.42));
        assert!(bag.keys().all(|k| k.starts_with("startPoint_")));
    }

    #[test]
    fn test_point_overrides_beat_defaults() {
        let mut feature = resolved_feature(1, 24.93);
        let properties = feature.properties_mut();
        properties.insert("walking_distance".into(), json!(0.0));
        properties.insert("parking_time".into(), json!(2.5));
        let bag = pipeline().run(&feature, Role::Destination).unwrap();

        assert_eq!(bag["endPoint_EuclideanDistance"], json!(0.0));
        assert_eq!(bag["endPoint_EuclideanDistanceWalkingTime"], json!(0.0));
        assert_eq!(bag["endPoint_AVGWalkingDistanceWalkingTime"], json!(0.0));
        assert_eq!(bag["endPoint_ParkingTime"], json!(2.5));
    }

    #[test]
    fn test_numeric_text_overrides_are_read() {
        let mut feature = resolved_feature(7, 24.93);
        let properties = feature.properties_mut();
        properties.insert("walking_distance".into(), json!("140"));
        properties.insert("parking_time".into(), json!("1.5"));
        let bag = pipeline().run(&feature, Role::Origin).unwrap();

        assert_eq!(bag["startPoint_AVGWalkingDistance"], json!(140.0));
        assert_eq!(bag["startPoint_AVGWalkingDistanceWalkingTime"], json!(2.0));
        assert_eq!(bag["startPoint_ParkingTime"], json!(1.5));
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let feature = resolved_feature(2, 24.94);
        let pipeline = pipeline();
        let first = pipeline.run(&feature, Role::Origin).unwrap();
        let second = pipeline.run(&feature, Role::Origin).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolved_feature_is_rejected() {
        let mut properties = Properties::new();
        properties.insert("id".into(), json!(3));
        let feature = Feature::with_properties(None, properties);
        let err = pipeline().run(&feature, Role::Origin).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingProperty { .. }));
    }

    #[test]
    fn test_cache_separates_roles_and_copies_on_read() {
        let cache = EnrichmentCache::new(pipeline(), "id");
        let feature = resolved_feature(4, 24.931);

        let mut origin = cache.get_or_compute(&feature, Role::Origin).unwrap();
        origin.insert("startPoint_extra".into(), json!(true));
        let again = cache.get_or_compute(&feature, Role::Origin).unwrap();
        assert!(!again.contains_key("startPoint_extra"));
        assert_eq!(cache.computations(), 1);

        let destination = cache.get_or_compute(&feature, Role::Destination).unwrap();
        assert!(destination.contains_key("endPoint_id"));
        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn test_additional_properties_merge_both_roles() {
        let cache = EnrichmentCache::new(pipeline(), "id");
        let merged = cache
            .insert_additional_properties(&resolved_feature(5, 24.93), &resolved_feature(6, 24.93))
            .unwrap();
        assert_eq!(merged["startPoint_id"], json!(5));
        assert_eq!(merged["endPoint_id"], json!(6));
    }
}
