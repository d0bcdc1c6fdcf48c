//! Snap input points to routable network vertices.
//!
//! Resolutions are cached per point identifier for the lifetime of the
//! resolver, which is one analysis unit. Misses are cached too, so a point
//! that cannot be snapped costs one widening sweep no matter how many pairs
//! it appears in.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cache::KeyedCache;
use crate::config::SearchConfig;
use crate::error::AnalysisError;
use crate::model::{
    COORDINATES_CRS, Crs, END_VERTEX_ID, Feature, FeatureExt, NEAREST_END_COORDINATES,
    NEAREST_START_COORDINATES, NEAREST_VERTEX_COORDINATES, Point, Properties,
    SELECTED_END_COORDINATES, SELECTED_POINT_COORDINATES, SELECTED_START_COORDINATES,
    START_VERTEX_ID, VERTEX_ID, VertexFeature, VertexId,
};
use crate::traits::{CoordinateTransform, RoutingBackend};

/// A feature snapped to the network, with the snap recorded in its properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub vertex_id: VertexId,
    /// The input point, in the CRS of its point set.
    pub selected: Point,
    pub feature: Feature,
}

impl Resolution {
    /// Whether both ends are the same input point once `other` is
    /// reprojected into this point's CRS.
    pub fn same_point(
        &self,
        other: &Resolution,
        transform: &dyn CoordinateTransform,
    ) -> Result<bool, AnalysisError> {
        let other = transform.transform(&other.selected, self.selected.crs())?;
        Ok(self.selected == other)
    }
}

/// Vertex ids and coordinates of both trip ends, as recorded by the
/// resolver, under the trip-level keys of route and summary features.
pub fn trip_end_properties(origin: &Resolution, destination: &Resolution) -> Properties {
    let mut properties = Properties::new();
    properties.insert(START_VERTEX_ID.to_string(), json!(origin.vertex_id));
    properties.insert(END_VERTEX_ID.to_string(), json!(destination.vertex_id));
    for (key, resolution, source) in [
        (SELECTED_START_COORDINATES, origin, SELECTED_POINT_COORDINATES),
        (SELECTED_END_COORDINATES, destination, SELECTED_POINT_COORDINATES),
        (NEAREST_START_COORDINATES, origin, NEAREST_VERTEX_COORDINATES),
        (NEAREST_END_COORDINATES, destination, NEAREST_VERTEX_COORDINATES),
    ] {
        if let Some(value) = resolution.feature.property(source) {
            properties.insert(key.to_string(), value.clone());
        }
    }
    properties
}

pub struct VertexResolver {
    backend: Arc<dyn RoutingBackend>,
    transform: Arc<dyn CoordinateTransform>,
    search: SearchConfig,
    point_identifier: String,
    cache: KeyedCache<String, Option<Resolution>>,
    backend_calls: AtomicUsize,
}

impl VertexResolver {
    pub fn new(
        backend: Arc<dyn RoutingBackend>,
        transform: Arc<dyn CoordinateTransform>,
        search: SearchConfig,
        point_identifier: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            transform,
            search,
            point_identifier: point_identifier.into(),
            cache: KeyedCache::new(),
            backend_calls: AtomicUsize::new(0),
        }
    }

    /// Resolve `feature`, whose coordinates are in `crs`.
    ///
    /// The returned feature is a copy of the input carrying `vertex_id`,
    /// `selectedPointCoordinates`, `nearestVertexCoordinates` and
    /// `coordinatesCRS`; callers may mutate it freely.
    pub fn resolve(&self, feature: &Feature, crs: &Crs) -> Result<Resolution, AnalysisError> {
        let id = feature.identifier(&self.point_identifier)?;
        let resolved = self
            .cache
            .get_or_try_insert_with(&id, || self.lookup(&id, feature, crs))?;
        resolved.ok_or_else(|| AnalysisError::VertexNotFound {
            point_id: id,
            radius: self.widest_radius(),
        })
    }

    /// Backend lookups issued so far.
    pub fn backend_calls(&self) -> usize {
        self.backend_calls.load(Ordering::Relaxed)
    }

    /// Points resolved or found unresolvable so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn widest_radius(&self) -> f64 {
        if self.search.routable_only {
            self.search.max_radius()
        } else {
            f64::INFINITY
        }
    }

    fn lookup(
        &self,
        id: &str,
        feature: &Feature,
        crs: &Crs,
    ) -> Result<Option<Resolution>, AnalysisError> {
        let selected = feature.point(crs)?;
        let query = self
            .transform
            .transform(&selected, self.backend.working_crs())?;

        let Some(vertex) = self.find_vertex(id, &query)? else {
            warn!(point = id, radius = self.widest_radius(), "no routable vertex found");
            return Ok(None);
        };

        let nearest = self.transform.transform(&vertex.point, crs)?;
        let mut enriched = feature.clone();
        let properties = enriched.properties_mut();
        properties.insert(VERTEX_ID.to_string(), json!(vertex.id));
        properties.insert(
            SELECTED_POINT_COORDINATES.to_string(),
            json!(selected.coordinates()),
        );
        properties.insert(
            NEAREST_VERTEX_COORDINATES.to_string(),
            json!(nearest.coordinates()),
        );
        properties.insert(
            COORDINATES_CRS.to_string(),
            Value::String(crs.to_string()),
        );

        debug!(point = id, vertex = %vertex.id, "resolved point");
        Ok(Some(Resolution {
            vertex_id: vertex.id,
            selected,
            feature: enriched,
        }))
    }

    /// Query with a widening radius: the initial radius, then up to
    /// `max_widen_attempts` increments.
    fn find_vertex(&self, id: &str, point: &Point) -> Result<Option<VertexFeature>, AnalysisError> {
        if !self.search.routable_only {
            self.backend_calls.fetch_add(1, Ordering::Relaxed);
            return Ok(self.backend.nearest_vertex(point)?);
        }

        for attempt in 0..=self.search.max_widen_attempts {
            let radius =
                self.search.initial_radius + f64::from(attempt) * self.search.radius_increment;
            self.backend_calls.fetch_add(1, Ordering::Relaxed);
            if let Some(vertex) = self.backend.nearest_routable_vertex(point, radius)? {
                return Ok(Some(vertex));
            }
            debug!(point = id, radius, "no vertex in radius, widening");
        }
        Ok(None)
    }
}
