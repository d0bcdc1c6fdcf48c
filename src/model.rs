//! Geographic data model shared by resolution, enrichment and summaries.
//!
//! Features and collections are the `geojson` crate's types; the routing
//! backend's extra collection members (`crs`, `totalFeatures`,
//! `overallProperties`) travel as foreign members. Points are plain values;
//! a reprojection always yields a new [`Point`].

use std::collections::HashMap;
use std::fmt;

use geojson::Value as Shape;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AnalysisError, RoutingError};

pub use geojson::{Feature, FeatureCollection, Geometry};

/// Open property mapping attached to every feature.
pub type Properties = geojson::JsonObject;

/// Vertex id recorded on a resolved feature.
pub const VERTEX_ID: &str = "vertex_id";
/// `[lng, lat]` of the point as given in the input file.
pub const SELECTED_POINT_COORDINATES: &str = "selectedPointCoordinates";
/// `[lng, lat]` of the vertex the point snapped to.
pub const NEAREST_VERTEX_COORDINATES: &str = "nearestVertexCoordinates";
/// CRS of both coordinate pairs above.
pub const COORDINATES_CRS: &str = "coordinatesCRS";

pub const EUCLIDEAN_DISTANCE: &str = "EuclideanDistance";
pub const EUCLIDEAN_DISTANCE_WALKING_TIME: &str = "EuclideanDistanceWalkingTime";
pub const AVG_WALKING_DISTANCE: &str = "AVGWalkingDistance";
pub const AVG_WALKING_DISTANCE_WALKING_TIME: &str = "AVGWalkingDistanceWalkingTime";
pub const PARKING_TIME: &str = "ParkingTime";

/// Cost attribute column written into merged summary features.
pub const COST_ATTRIBUTE: &str = "costAttribute";

pub const START_VERTEX_ID: &str = "startVertexId";
pub const END_VERTEX_ID: &str = "endVertexId";
pub const SELECTED_START_COORDINATES: &str = "selectedStartCoordinates";
pub const SELECTED_END_COORDINATES: &str = "selectedEndCoordinates";
pub const NEAREST_START_COORDINATES: &str = "nearestStartCoordinates";
pub const NEAREST_END_COORDINATES: &str = "nearestEndCoordinates";

const OVERALL_PROPERTIES: &str = "overallProperties";
const TOTAL_FEATURES: &str = "totalFeatures";
const CRS_MEMBER: &str = "crs";

/// Coordinate reference system identifier, normalised to `EPSG:<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(String);

impl Crs {
    pub fn epsg(code: u32) -> Self {
        Self(format!("EPSG:{code}"))
    }

    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }

    pub fn web_mercator() -> Self {
        Self::epsg(3857)
    }

    /// Parse the CRS spellings found in GeoJSON files and backend configs:
    /// `EPSG:3857`, `epsg:3857`, `urn:ogc:def:crs:EPSG::3857` and the
    /// `CRS84` alias of WGS84.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.ends_with("CRS84") {
            return Some(Self::wgs84());
        }
        let upper = name.to_ascii_uppercase();
        if !upper.contains("EPSG") {
            return None;
        }
        upper
            .rsplit(':')
            .next()
            .and_then(|code| code.parse::<u32>().ok())
            .map(Self::epsg)
    }

    pub fn code(&self) -> Option<u32> {
        self.0
            .strip_prefix("EPSG:")
            .and_then(|code| code.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic point. Equality compares both coordinates and the CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    lat: f64,
    lng: f64,
    crs: Crs,
}

impl Point {
    pub fn new(lat: f64, lng: f64, crs: Crs) -> Self {
        Self { lat, lng, crs }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// GeoJSON axis order: `[lng, lat]`.
    pub fn coordinates(&self) -> [f64; 2] {
        [self.lng, self.lat]
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(Shape::Point(vec![self.lng, self.lat]))
    }
}

/// Opaque identifier of a routing-network vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub i64);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain accessors over a GeoJSON feature.
pub trait FeatureExt {
    /// Feature carrying `properties`, with no id or foreign members.
    fn with_properties(geometry: Option<Geometry>, properties: Properties) -> Self;

    fn from_point(point: &Point, properties: Properties) -> Self;

    /// Point of a `Point` geometry, or the first member of a `MultiPoint`.
    fn point(&self, crs: &Crs) -> Result<Point, AnalysisError>;

    /// Value of the identifier property rendered as a string.
    fn identifier(&self, key: &str) -> Result<String, AnalysisError>;

    /// Numeric property; numeric strings are accepted too.
    fn property_f64(&self, key: &str) -> Option<f64>;

    /// Property bag, created empty when the feature has none.
    fn properties_mut(&mut self) -> &mut Properties;
}

impl FeatureExt for Feature {
    fn with_properties(geometry: Option<Geometry>, properties: Properties) -> Self {
        Feature {
            bbox: None,
            geometry,
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    fn from_point(point: &Point, properties: Properties) -> Self {
        Self::with_properties(Some(point.geometry()), properties)
    }

    fn point(&self, crs: &Crs) -> Result<Point, AnalysisError> {
        let invalid = |reason: &str| AnalysisError::InvalidGeometry {
            reason: reason.to_string(),
        };
        let Some(geometry) = &self.geometry else {
            return Err(invalid("feature has no geometry"));
        };
        let position = match &geometry.value {
            Shape::Point(position) => Some(position),
            Shape::MultiPoint(positions) => positions.first(),
            _ => return Err(invalid("expected Point or MultiPoint geometry")),
        };
        let (lng, lat) = position
            .and_then(|p| Some((*p.first()?, *p.get(1)?)))
            .ok_or_else(|| invalid("missing or malformed coordinates"))?;
        Ok(Point::new(lat, lng, crs.clone()))
    }

    fn identifier(&self, key: &str) -> Result<String, AnalysisError> {
        match self.property(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(Value::Number(value)) => Ok(value.to_string()),
            _ => Err(AnalysisError::MissingIdentifier {
                key: key.to_string(),
            }),
        }
    }

    fn property_f64(&self, key: &str) -> Option<f64> {
        self.property(key).and_then(number)
    }

    fn properties_mut(&mut self) -> &mut Properties {
        self.properties.get_or_insert_with(Properties::new)
    }
}

/// Number held by a property, either as a JSON number or as numeric text.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(text) => text.trim().parse().ok(),
        other => other.as_f64(),
    }
}

/// Render a property value as table text: strings unquoted, null empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn coordinate_pair(value: &Value) -> Option<(f64, f64)> {
    let x = value.get(0)?.as_f64()?;
    let y = value.get(1)?.as_f64()?;
    Some((x, y))
}

/// Count from a `totalFeatures` member. GeoServer reports `"unknown"` for
/// some views, which reads as no count.
fn total_features(members: &Properties) -> Option<usize> {
    members
        .get(TOTAL_FEATURES)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

/// Collection-level members the way GeoServer emits them.
pub trait CollectionExt {
    /// Collection of `features` with a matching `totalFeatures` member.
    fn from_features(features: Vec<Feature>) -> Self;

    /// Attach a named-CRS member.
    fn with_crs(self, crs: &Crs) -> Self;

    /// CRS named in the `crs` member, if any.
    fn named_crs(&self) -> Option<Crs>;
}

impl CollectionExt for FeatureCollection {
    fn from_features(features: Vec<Feature>) -> Self {
        let mut members = Properties::new();
        members.insert(TOTAL_FEATURES.to_string(), json!(features.len()));
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(members),
        }
    }

    fn with_crs(mut self, crs: &Crs) -> Self {
        self.foreign_members.get_or_insert_with(Properties::new).insert(
            CRS_MEMBER.to_string(),
            json!({ "type": "name", "properties": { "name": crs.as_str() } }),
        );
        self
    }

    fn named_crs(&self) -> Option<Crs> {
        self.foreign_members
            .as_ref()?
            .get(CRS_MEMBER)?
            .pointer("/properties/name")
            .and_then(Value::as_str)
            .and_then(Crs::parse)
    }
}

/// Named set of input points sharing one CRS.
#[derive(Debug, Clone)]
pub struct PointSet {
    pub name: String,
    pub crs: Crs,
    pub features: Vec<Feature>,
}

/// Vertex returned by a nearest-vertex lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexFeature {
    pub id: VertexId,
    pub point: Point,
}

/// Shortest path between two vertices: ordered segments plus the merged
/// metadata block describing the trip. Reads and writes as a GeoJSON
/// feature collection with `overallProperties` as a foreign member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "FeatureCollection", from = "FeatureCollection")]
pub struct PathFeatureCollection {
    pub features: Vec<Feature>,
    pub overall_properties: Properties,
    /// Remaining top-level members such as `crs` and `totalFeatures`.
    pub members: Properties,
}

impl PathFeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            overall_properties: Properties::new(),
            members: Properties::new(),
        }
    }

    pub fn total_features(&self) -> Option<usize> {
        total_features(&self.members)
    }

    /// Fill `totalFeatures` from the segment count when the backend left it
    /// out or reported it as unknown.
    pub fn ensure_total_features(&mut self) {
        if self.total_features().is_none() {
            self.members
                .insert(TOTAL_FEATURES.to_string(), json!(self.features.len()));
        }
    }
}

impl From<FeatureCollection> for PathFeatureCollection {
    fn from(collection: FeatureCollection) -> Self {
        let mut members = collection.foreign_members.unwrap_or_default();
        let overall_properties = match members.remove(OVERALL_PROPERTIES) {
            Some(Value::Object(properties)) => properties,
            _ => Properties::new(),
        };
        Self {
            features: collection.features,
            overall_properties,
            members,
        }
    }
}

impl From<PathFeatureCollection> for FeatureCollection {
    fn from(path: PathFeatureCollection) -> Self {
        let mut members = path.members;
        members.insert(
            OVERALL_PROPERTIES.to_string(),
            Value::Object(path.overall_properties),
        );
        FeatureCollection {
            bbox: None,
            features: path.features,
            foreign_members: Some(members),
        }
    }
}

/// Aggregated cost between two vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct CostFeature {
    pub start_vertex_id: VertexId,
    pub end_vertex_id: VertexId,
    pub total_cost: f64,
    pub geometry: Option<Geometry>,
    /// Remaining backend properties, passed through to summaries.
    pub extra: Properties,
}

impl CostFeature {
    pub fn new(start: VertexId, end: VertexId, total_cost: f64) -> Self {
        Self {
            start_vertex_id: start,
            end_vertex_id: end,
            total_cost,
            geometry: None,
            extra: Properties::new(),
        }
    }

    /// Read a cost feature from a backend GeoJSON feature.
    pub fn from_feature(feature: Feature) -> Result<Self, RoutingError> {
        let mut properties = feature.properties.unwrap_or_default();
        let start = take_vertex(&mut properties, "start_vertex_id")?;
        let end = take_vertex(&mut properties, "end_vertex_id")?;
        let total_cost = properties
            .remove("total_cost")
            .and_then(|value| value.as_f64())
            .ok_or_else(|| RoutingError::Parse {
                message: "cost feature without numeric `total_cost`".to_string(),
            })?;
        Ok(Self {
            start_vertex_id: start,
            end_vertex_id: end,
            total_cost,
            geometry: feature.geometry,
            extra: properties,
        })
    }
}

fn take_vertex(properties: &mut Properties, key: &str) -> Result<VertexId, RoutingError> {
    properties
        .remove(key)
        .and_then(|value| value.as_i64())
        .map(VertexId)
        .ok_or_else(|| RoutingError::Parse {
            message: format!("cost feature without integer `{key}`"),
        })
}

pub type CostFeatureCollection = Vec<CostFeature>;

/// Two-level lookup `origin vertex -> destination vertex -> cost`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSummaryMap {
    entries: HashMap<VertexId, HashMap<VertexId, CostFeature>>,
}

impl CostSummaryMap {
    /// Single pass over the features; a repeated pair keeps the last one.
    pub fn from_features(features: impl IntoIterator<Item = CostFeature>) -> Self {
        let mut entries: HashMap<VertexId, HashMap<VertexId, CostFeature>> = HashMap::new();
        for feature in features {
            entries
                .entry(feature.start_vertex_id)
                .or_default()
                .insert(feature.end_vertex_id, feature);
        }
        Self { entries }
    }

    pub fn get(&self, origin: VertexId, destination: VertexId) -> Option<&CostFeature> {
        self.entries.get(&origin)?.get(&destination)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One row of the per-cost tabular summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSummary {
    pub origin_id: String,
    pub destination_id: String,
    pub total_distance: f64,
    pub total_travel_time: f64,
}

impl PairSummary {
    pub fn to_record(&self) -> [String; 4] {
        [
            self.origin_id.clone(),
            self.destination_id.clone(),
            self.total_distance.to_string(),
            self.total_travel_time.to_string(),
        ]
    }
}

/// Which end of a trip a point sits on; decides the property prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Origin,
    Destination,
}

impl Role {
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Origin => "startPoint_",
            Role::Destination => "endPoint_",
        }
    }

    pub fn key(self, suffix: &str) -> String {
        format!("{}{}", self.prefix(), suffix)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Origin => f.write_str("origin"),
            Role::Destination => f.write_str("destination"),
        }
    }
}
