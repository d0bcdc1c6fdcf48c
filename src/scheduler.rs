//! Per-pair routing: every origin against every destination for every
//! requested cost attribute, fanned out over the worker pool.
//!
//! A job resolves both ends, asks the backend for the shortest path, merges
//! the enrichment of both ends into the route's overall properties and
//! appends one summary row. Rows for a cost attribute share one CSV writer;
//! the CSVs are only finalised after every job has finished.

use std::path::PathBuf;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::prelude::*;
use serde_json::json;
use tracing::{Span, debug, info, warn};

use crate::config::OutputConfig;
use crate::cost::CostAttribute;
use crate::enrichment::EnrichmentCache;
use crate::error::AnalysisError;
use crate::model::{
    AVG_WALKING_DISTANCE, AVG_WALKING_DISTANCE_WALKING_TIME, COST_ATTRIBUTE, Crs,
    EUCLIDEAN_DISTANCE, EUCLIDEAN_DISTANCE_WALKING_TIME, Feature, FeatureExt, PARKING_TIME,
    PairSummary, PathFeatureCollection, PointSet, Role, number, value_text,
};
use crate::output::{self, OutputLayout, SummaryWriter};
use crate::resolver::{Resolution, VertexResolver, trip_end_properties};
use crate::traits::{CoordinateTransform, RoutingBackend};

/// What happened to one `(origin, destination, cost)` job.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Written(PairSummary),
    /// Origin and destination are the same point.
    SamePoint,
    /// One end could not be snapped to the network.
    Unresolved,
}

/// Totals for one cost attribute after the fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRun {
    pub cost: CostAttribute,
    pub written: usize,
    pub same_point: usize,
    pub unresolved: usize,
    /// Pair summary CSV; deleted after compression unless debugging.
    pub summary_csv: PathBuf,
}

pub struct PairScheduler<'a> {
    pub backend: &'a dyn RoutingBackend,
    pub transform: &'a dyn CoordinateTransform,
    pub resolver: &'a VertexResolver,
    pub enrichment: &'a EnrichmentCache,
    pub pool: &'a ThreadPool,
    pub output: &'a OutputConfig,
}

struct Job<'s> {
    origin: &'s Feature,
    destination: &'s Feature,
    cost: CostAttribute,
    writer: &'s SummaryWriter,
}

impl PairScheduler<'_> {
    /// Route every `origin x destination x cost` combination.
    ///
    /// Backend failures abort the whole call once every started job has
    /// returned; unresolvable points only drop the pairs they take part in.
    pub fn compute_all(
        &self,
        origins: &PointSet,
        destinations: &PointSet,
        costs: &[CostAttribute],
        layout: &OutputLayout,
        prefix: &str,
    ) -> Result<Vec<CostRun>, AnalysisError> {
        let started = Instant::now();
        let mut writers = Vec::with_capacity(costs.len());
        for &cost in costs {
            if self.output.store_route_files {
                output::reset_dir(&layout.routes_dir(cost))?;
            }
            let path = layout.pair_summary_csv(cost, prefix);
            output::remove_if_exists(&path)?;
            let writer = SummaryWriter::create(
                &path,
                &self.output.summary_header,
                self.output.csv_delimiter(),
            )?;
            writers.push((cost, writer));
        }

        let jobs: Vec<Job<'_>> = writers
            .iter()
            .flat_map(|(cost, writer)| {
                origins.features.iter().flat_map(move |origin| {
                    destinations.features.iter().map(move |destination| Job {
                        origin,
                        destination,
                        cost: *cost,
                        writer,
                    })
                })
            })
            .collect();
        info!(
            jobs = jobs.len(),
            origins = origins.features.len(),
            destinations = destinations.features.len(),
            "starting pair fan-out"
        );

        let span = Span::current();
        let outcomes: Vec<(CostAttribute, PairOutcome)> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let _entered = span.enter();
                    self.run_job(job, origins, destinations, layout)
                        .map(|outcome| (job.cost, outcome))
                })
                .collect::<Result<Vec<_>, AnalysisError>>()
        })?;
        drop(jobs);

        let mut runs = Vec::with_capacity(writers.len());
        for (cost, writer) in writers {
            let summary_csv = writer.finish()?;
            let mut run = CostRun {
                cost,
                written: 0,
                same_point: 0,
                unresolved: 0,
                summary_csv,
            };
            for (_, outcome) in outcomes.iter().filter(|(c, _)| *c == cost) {
                match outcome {
                    PairOutcome::Written(_) => run.written += 1,
                    PairOutcome::SamePoint => run.same_point += 1,
                    PairOutcome::Unresolved => run.unresolved += 1,
                }
            }
            output::compress_into_zip(&layout.pair_summary_zip(cost), &run.summary_csv)?;
            if !self.output.debug {
                output::remove_if_exists(&run.summary_csv)?;
            }
            info!(
                %cost,
                written = run.written,
                same_point = run.same_point,
                unresolved = run.unresolved,
                "pair summaries finalised"
            );
            runs.push(run);
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pair fan-out finished"
        );
        Ok(runs)
    }

    fn run_job(
        &self,
        job: &Job<'_>,
        origins: &PointSet,
        destinations: &PointSet,
        layout: &OutputLayout,
    ) -> Result<PairOutcome, AnalysisError> {
        let origin_point = job.origin.point(&origins.crs)?;
        let destination_point = self
            .transform
            .transform(&job.destination.point(&destinations.crs)?, &origins.crs)?;
        if origin_point == destination_point {
            debug!(cost = %job.cost, "origin and destination coincide, pair skipped");
            return Ok(PairOutcome::SamePoint);
        }

        let Some(origin) = self.resolve_end(job.origin, &origins.crs)? else {
            return Ok(PairOutcome::Unresolved);
        };
        let Some(destination) = self.resolve_end(job.destination, &destinations.crs)? else {
            return Ok(PairOutcome::Unresolved);
        };

        let mut path = self
            .backend
            .shortest_path(origin.vertex_id, destination.vertex_id, job.cost)?;
        let additional = self
            .enrichment
            .insert_additional_properties(&origin.feature, &destination.feature)?;
        path.overall_properties.extend(additional);
        path.overall_properties
            .extend(trip_end_properties(&origin, &destination));
        path.overall_properties
            .insert(COST_ATTRIBUTE.to_string(), json!(job.cost.english_name()));
        path.ensure_total_features();

        let summary = calculate_small_summary(&path, job.cost, &self.output.point_identifier)?;
        job.writer.append(&summary)?;
        if self.output.store_route_files {
            let file = layout.route_file(job.cost, &summary.origin_id, &summary.destination_id);
            output::write_geojson(&file, &path)?;
        }
        debug!(
            origin = %summary.origin_id,
            destination = %summary.destination_id,
            cost = %job.cost,
            "pair routed"
        );
        Ok(PairOutcome::Written(summary))
    }

    fn resolve_end(
        &self,
        feature: &Feature,
        crs: &Crs,
    ) -> Result<Option<Resolution>, AnalysisError> {
        match self.resolver.resolve(feature, crs) {
            Ok(resolution) => Ok(Some(resolution)),
            Err(e) if e.is_point_local() => {
                warn!(error = %e, "pair skipped");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Door-to-door distance and travel time of a routed pair.
///
/// Distance adds the euclidean offsets and average walking distances at both
/// ends to the segment distances. Travel time adds the matching walking
/// times, the destination parking time and the segment costs.
pub fn calculate_small_summary(
    path: &PathFeatureCollection,
    cost: CostAttribute,
    point_identifier: &str,
) -> Result<PairSummary, AnalysisError> {
    let overall = &path.overall_properties;
    let id = |role: Role| {
        let key = role.key(point_identifier);
        overall
            .get(&key)
            .map(value_text)
            .ok_or(AnalysisError::MissingIdentifier { key })
    };
    let number = |role: Role, suffix: &str| {
        let key = role.key(suffix);
        overall
            .get(&key)
            .and_then(number)
            .ok_or(AnalysisError::MissingProperty { key })
    };
    let segments = |key: &str| -> f64 {
        path.features
            .iter()
            .filter_map(|segment| segment.property_f64(key))
            .sum()
    };

    let total_distance = number(Role::Origin, EUCLIDEAN_DISTANCE)?
        + number(Role::Origin, AVG_WALKING_DISTANCE)?
        + segments("distance")
        + number(Role::Destination, AVG_WALKING_DISTANCE)?
        + number(Role::Destination, EUCLIDEAN_DISTANCE)?;

    let total_travel_time = number(Role::Origin, EUCLIDEAN_DISTANCE_WALKING_TIME)?
        + number(Role::Origin, AVG_WALKING_DISTANCE_WALKING_TIME)?
        + segments(cost.english_name())
        + number(Role::Destination, PARKING_TIME)?
        + number(Role::Destination, AVG_WALKING_DISTANCE_WALKING_TIME)?
        + number(Role::Destination, EUCLIDEAN_DISTANCE_WALKING_TIME)?;

    Ok(PairSummary {
        origin_id: id(Role::Origin)?,
        destination_id: id(Role::Destination)?,
        total_distance,
        total_travel_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Properties;
    use serde_json::Value;

    fn path_with(overall: &[(&str, Value)], segments: &[(f64, f64)]) -> PathFeatureCollection {
        let features = segments
            .iter()
            .map(|(distance, time)| {
                let mut properties = Properties::new();
                properties.insert("distance".into(), json!(distance));
                properties.insert("fast_time".into(), json!(time));
                Feature::with_properties(None, properties)
            })
            .collect();
        let mut path = PathFeatureCollection::new(features);
        for (key, value) in overall {
            path.overall_properties.insert(key.to_string(), value.clone());
        }
        path
    }

    fn full_overall() -> Vec<(&'static str, Value)> {
        vec![
            ("startPoint_id", json!(0)),
            ("endPoint_id", json!(38)),
            ("startPoint_EuclideanDistance", json!(10.0)),
            ("startPoint_AVGWalkingDistance", json!(180.0)),
            ("endPoint_AVGWalkingDistance", json!(180.0)),
            ("endPoint_EuclideanDistance", json!(20.0)),
            ("startPoint_EuclideanDistanceWalkingTime", json!(0.5)),
            ("startPoint_AVGWalkingDistanceWalkingTime", json!(2.0)),
            ("endPoint_ParkingTime", json!(0.42)),
            ("endPoint_AVGWalkingDistanceWalkingTime", json!(2.0)),
            ("endPoint_EuclideanDistanceWalkingTime", json!(1.0)),
        ]
    }

    #[test]
    fn test_small_summary_adds_every_leg() {
        let path = path_with(&full_overall(), &[(1000.0, 3.0), (500.0, 1.5)]);
        let summary = calculate_small_summary(&path, CostAttribute::BicycleFastTime, "id").unwrap();

        assert_eq!(summary.origin_id, "0");
        assert_eq!(summary.destination_id, "38");
        assert!((summary.total_distance - 1890.0).abs() < 1e-9);
        assert!((summary.total_travel_time - 10.42).abs() < 1e-9);
    }

    #[test]
    fn test_small_summary_requires_identifiers() {
        let overall: Vec<_> = full_overall()
            .into_iter()
            .filter(|(key, _)| *key != "endPoint_id")
            .collect();
        let path = path_with(&overall, &[(1000.0, 3.0)]);
        let err = calculate_small_summary(&path, CostAttribute::BicycleFastTime, "id").unwrap_err();
        assert!(matches!(err, AnalysisError::MissingIdentifier { ref key } if key == "endPoint_id"));
    }
}
