//! Deterministic routing backend for tests.
//!
//! [`StubBackend`] snaps every point onto a vertex at the same coordinates,
//! answers cost queries from a fixed formula and counts each query kind, so
//! tests can assert on caching and query planning without a live service.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use serde_json::json;

use crate::cost::CostAttribute;
use crate::error::RoutingError;
use crate::model::{
    CostFeature, CostFeatureCollection, Crs, Feature, FeatureExt, Geometry, PathFeatureCollection,
    Point, Properties, VertexFeature, VertexId,
};
use crate::traits::RoutingBackend;

/// Backend query kinds, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    NearestVertex,
    NearestRoutableVertex,
    ShortestPath,
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

const QUERY_KINDS: usize = 7;

#[derive(Debug)]
pub struct StubBackend {
    crs: Crs,
    snap_radius: f64,
    vertices: Mutex<Vec<VertexFeature>>,
    next_id: AtomicI64,
    path_segments: Option<Vec<Properties>>,
    missing_pairs: HashSet<(VertexId, VertexId)>,
    failures: AtomicUsize,
    calls: [AtomicUsize; QUERY_KINDS],
}

impl StubBackend {
    /// Backend working in `crs` that snaps at any radius.
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            snap_radius: 0.0,
            vertices: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1000),
            path_segments: None,
            missing_pairs: HashSet::new(),
            failures: AtomicUsize::new(0),
            calls: Default::default(),
        }
    }

    /// Routable lookups return nothing below `radius` metres.
    #[must_use]
    pub fn with_snap_radius(mut self, radius: f64) -> Self {
        self.snap_radius = radius;
        self
    }

    /// Pin the vertex id a coordinate snaps to. `lat`/`lng` are in the
    /// backend CRS.
    #[must_use]
    pub fn with_vertex(self, id: i64, lat: f64, lng: f64) -> Self {
        let point = Point::new(lat, lng, self.crs.clone());
        self.vertices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(VertexFeature {
                id: VertexId(id),
                point,
            });
        self
    }

    /// Segment properties returned for every shortest-path query.
    #[must_use]
    pub fn with_path_segments(mut self, segments: Vec<Properties>) -> Self {
        self.path_segments = Some(segments);
        self
    }

    /// Leave the pair out of every bulk cost answer.
    #[must_use]
    pub fn with_missing_pair(mut self, origin: i64, destination: i64) -> Self {
        self.missing_pairs
            .insert((VertexId(origin), VertexId(destination)));
        self
    }

    /// Fail the next `count` queries of any kind.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self, kind: QueryKind) -> usize {
        self.calls[kind as usize].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Cost formula shared by path and bulk answers.
    pub fn cost_between(origin: VertexId, destination: VertexId) -> f64 {
        (origin.0 - destination.0).abs() as f64 + 1.0
    }

    fn record(&self, kind: QueryKind) -> Result<(), RoutingError> {
        self.calls[kind as usize].fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RoutingError::Service {
                message: format!("injected failure on {kind:?}"),
            });
        }
        Ok(())
    }

    fn snap(&self, point: &Point) -> VertexFeature {
        let mut vertices = self.vertices.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(vertex) = vertices
            .iter()
            .find(|v| v.point.lat() == point.lat() && v.point.lng() == point.lng())
        {
            return vertex.clone();
        }
        let vertex = VertexFeature {
            id: VertexId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            point: Point::new(point.lat(), point.lng(), self.crs.clone()),
        };
        vertices.push(vertex.clone());
        vertex
    }

    fn vertex_coordinates(&self, id: VertexId) -> Vec<f64> {
        let vertices = self.vertices.lock().unwrap_or_else(PoisonError::into_inner);
        vertices
            .iter()
            .find(|v| v.id == id)
            .map_or_else(|| vec![0.0, 0.0], |v| v.point.coordinates().to_vec())
    }

    fn bulk(
        &self,
        origins: &[VertexId],
        destinations: &[VertexId],
    ) -> CostFeatureCollection {
        origins
            .iter()
            .flat_map(|&o| destinations.iter().map(move |&d| (o, d)))
            .filter(|pair| !self.missing_pairs.contains(pair))
            .map(|(o, d)| CostFeature::new(o, d, Self::cost_between(o, d)))
            .collect()
    }
}

impl RoutingBackend for StubBackend {
    fn working_crs(&self) -> &Crs {
        &self.crs
    }

    fn nearest_vertex(&self, point: &Point) -> Result<Option<VertexFeature>, RoutingError> {
        self.record(QueryKind::NearestVertex)?;
        Ok(Some(self.snap(point)))
    }

    fn nearest_routable_vertex(
        &self,
        point: &Point,
        radius: f64,
    ) -> Result<Option<VertexFeature>, RoutingError> {
        self.record(QueryKind::NearestRoutableVertex)?;
        if radius < self.snap_radius {
            return Ok(None);
        }
        Ok(Some(self.snap(point)))
    }

    fn shortest_path(
        &self,
        origin: VertexId,
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<PathFeatureCollection, RoutingError> {
        self.record(QueryKind::ShortestPath)?;
        let segments = self.path_segments.clone().unwrap_or_else(|| {
            let mut properties = Properties::new();
            properties.insert("id".into(), json!(1));
            properties.insert("seq".into(), json!(1));
            properties.insert("direction".into(), json!(1.0));
            properties.insert("distance".into(), json!(1000.0));
            properties.insert(
                cost.english_name().into(),
                json!(Self::cost_between(origin, destination)),
            );
            vec![properties]
        });
        let geometry = Geometry::new(geojson::Value::LineString(vec![
            self.vertex_coordinates(origin),
            self.vertex_coordinates(destination),
        ]));
        let features = segments
            .into_iter()
            .map(|properties| Feature::with_properties(Some(geometry.clone()), properties))
            .collect();
        Ok(PathFeatureCollection::new(features))
    }

    fn total_cost_one_to_one(
        &self,
        origin: VertexId,
        destination: VertexId,
        _cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.record(QueryKind::OneToOne)?;
        Ok(self.bulk(&[origin], &[destination]))
    }

    fn total_cost_one_to_many(
        &self,
        origin: VertexId,
        destinations: &[VertexId],
        _cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.record(QueryKind::OneToMany)?;
        Ok(self.bulk(&[origin], destinations))
    }

    fn total_cost_many_to_one(
        &self,
        origins: &[VertexId],
        destination: VertexId,
        _cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.record(QueryKind::ManyToOne)?;
        Ok(self.bulk(origins, &[destination]))
    }

    fn total_cost_many_to_many(
        &self,
        origins: &[VertexId],
        destinations: &[VertexId],
        _cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.record(QueryKind::ManyToMany)?;
        Ok(self.bulk(origins, destinations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_repeat_coordinates_to_same_vertex() {
        let backend = StubBackend::new(Crs::wgs84()).with_vertex(7, 60.0, 25.0);
        let point = Point::new(60.0, 25.0, Crs::wgs84());
        let vertex = backend.nearest_vertex(&point).unwrap().unwrap();
        assert_eq!(vertex.id, VertexId(7));

        let other = Point::new(61.0, 25.0, Crs::wgs84());
        let first = backend.nearest_vertex(&other).unwrap().unwrap();
        let second = backend.nearest_vertex(&other).unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(backend.calls(QueryKind::NearestVertex), 3);
    }

    #[test]
    fn injected_failures_run_out() {
        let backend = StubBackend::new(Crs::wgs84());
        backend.fail_next(2);
        let point = Point::new(60.0, 25.0, Crs::wgs84());
        assert!(backend.nearest_vertex(&point).is_err());
        assert!(backend.nearest_vertex(&point).is_err());
        assert!(backend.nearest_vertex(&point).is_ok());
    }

    #[test]
    fn bulk_answers_skip_missing_pairs() {
        let backend = StubBackend::new(Crs::wgs84()).with_missing_pair(1, 2);
        let costs = backend
            .total_cost_many_to_many(
                &[VertexId(1), VertexId(3)],
                &[VertexId(2)],
                CostAttribute::Distance,
            )
            .unwrap();
        assert_eq!(costs.len(), 1);
        assert_eq!(costs[0].start_vertex_id, VertexId(3));
        assert_eq!(costs[0].total_cost, 2.0);
    }
}
