//! Seams to the collaborators the engine drives but does not implement.
//!
//! The routing backend owns the network graph and the shortest-path search;
//! reprojection and spatial joins live outside the engine as well. Each is a
//! narrow trait so tests can substitute deterministic stand-ins.

use crate::cost::CostAttribute;
use crate::error::{AnalysisError, ProjectionError, RoutingError};
use crate::model::{
    CostFeatureCollection, Crs, PathFeatureCollection, Point, PointSet, VertexFeature, VertexId,
};

/// Queries a routing network for snapping and costs.
///
/// Implementations are shared across worker threads.
pub trait RoutingBackend: Send + Sync {
    /// CRS the backend expects query points in.
    fn working_crs(&self) -> &Crs;

    /// Nearest vertex of any kind, without a radius bound.
    fn nearest_vertex(&self, point: &Point) -> Result<Option<VertexFeature>, RoutingError>;

    /// Nearest vertex that can start or end a route, within `radius` metres.
    fn nearest_routable_vertex(
        &self,
        point: &Point,
        radius: f64,
    ) -> Result<Option<VertexFeature>, RoutingError>;

    /// Route segments between two vertices ranked by `cost`.
    fn shortest_path(
        &self,
        origin: VertexId,
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<PathFeatureCollection, RoutingError>;

    fn total_cost_one_to_one(
        &self,
        origin: VertexId,
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError>;

    fn total_cost_one_to_many(
        &self,
        origin: VertexId,
        destinations: &[VertexId],
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError>;

    fn total_cost_many_to_one(
        &self,
        origins: &[VertexId],
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError>;

    fn total_cost_many_to_many(
        &self,
        origins: &[VertexId],
        destinations: &[VertexId],
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError>;
}

/// Pure coordinate reprojection.
pub trait CoordinateTransform: Send + Sync {
    fn transform(&self, point: &Point, target: &Crs) -> Result<Point, ProjectionError>;
}

/// Spatial join that attaches attributes from other layers before resolution.
pub trait LayerMerge: Send + Sync {
    fn merge(&self, points: PointSet) -> Result<PointSet, AnalysisError>;
}

/// Pass-through merge used when no additional layers are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLayerMerge;

impl LayerMerge for NoLayerMerge {
    fn merge(&self, points: PointSet) -> Result<PointSet, AnalysisError> {
        Ok(points)
    }
}
