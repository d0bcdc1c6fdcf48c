//! Bulk cost matrices.
//!
//! The query shape follows the input cardinality: a single pair, one
//! directional bulk query, or a grid of fixed-size blocks. Block size bounds
//! the payload of each backend request and never changes the result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::cost::CostAttribute;
use crate::error::RoutingError;
use crate::model::{CostSummaryMap, VertexId};
use crate::traits::RoutingBackend;

/// Backend queries needed for one matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    Empty,
    OneToOne(VertexId, VertexId),
    OneToMany(VertexId, Vec<VertexId>),
    ManyToOne(Vec<VertexId>, VertexId),
    ManyToMany {
        blocks: Vec<(Vec<VertexId>, Vec<VertexId>)>,
    },
}

impl QueryPlan {
    pub fn query_count(&self) -> usize {
        match self {
            QueryPlan::Empty => 0,
            QueryPlan::ManyToMany { blocks } => blocks.len(),
            _ => 1,
        }
    }
}

pub struct MatrixPlanner {
    backend: Arc<dyn RoutingBackend>,
    pool: Arc<ThreadPool>,
    block_size: usize,
}

impl MatrixPlanner {
    pub fn new(backend: Arc<dyn RoutingBackend>, pool: Arc<ThreadPool>, block_size: usize) -> Self {
        Self {
            backend,
            pool,
            block_size: block_size.max(1),
        }
    }

    /// Plan the queries for `origins x destinations`. Repeated ids are
    /// dropped, first occurrence kept.
    pub fn plan(&self, origins: &[VertexId], destinations: &[VertexId]) -> QueryPlan {
        let origins = dedup(origins);
        let destinations = dedup(destinations);

        if origins.is_empty() || destinations.is_empty() {
            return QueryPlan::Empty;
        }
        match (origins.len(), destinations.len()) {
            (1, 1) => QueryPlan::OneToOne(origins[0], destinations[0]),
            (1, _) => QueryPlan::OneToMany(origins[0], destinations),
            (_, 1) => QueryPlan::ManyToOne(origins, destinations[0]),
            _ => {
                let blocks = origins
                    .chunks(self.block_size)
                    .flat_map(|o| {
                        destinations
                            .chunks(self.block_size)
                            .map(move |d| (o.to_vec(), d.to_vec()))
                    })
                    .collect();
                QueryPlan::ManyToMany { blocks }
            }
        }
    }

    /// Costs for every reachable `origin x destination` pair.
    pub fn compute_matrix(
        &self,
        origins: &[VertexId],
        destinations: &[VertexId],
        cost: CostAttribute,
    ) -> Result<CostSummaryMap, RoutingError> {
        let started = Instant::now();
        let plan = self.plan(origins, destinations);
        let queries = plan.query_count();
        debug!(queries, %cost, "planned cost matrix");

        let backend = self.backend.as_ref();
        let features = match plan {
            QueryPlan::Empty => Vec::new(),
            QueryPlan::OneToOne(origin, destination) => {
                backend.total_cost_one_to_one(origin, destination, cost)?
            }
            QueryPlan::OneToMany(origin, destinations) => {
                backend.total_cost_one_to_many(origin, &destinations, cost)?
            }
            QueryPlan::ManyToOne(origins, destination) => {
                backend.total_cost_many_to_one(&origins, destination, cost)?
            }
            QueryPlan::ManyToMany { blocks } => {
                let results: Vec<_> = self.pool.install(|| {
                    blocks
                        .par_iter()
                        .map(|(o, d)| backend.total_cost_many_to_many(o, d, cost))
                        .collect::<Result<Vec<_>, RoutingError>>()
                })?;
                results.into_iter().flatten().collect()
            }
        };

        let map = CostSummaryMap::from_features(features);
        info!(
            queries,
            entries = map.len(),
            %cost,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cost matrix ready"
        );
        Ok(map)
    }
}

fn dedup(ids: &[VertexId]) -> Vec<VertexId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
