//! Analysis driver.
//!
//! An [`Analyst`] owns the backend, the worker pool and the configuration.
//! Each analysis unit (one origin file against one destination file) runs in
//! its own [`Session`], so resolution and enrichment caches never outlive
//! the attempt that filled them. [`Analyst::run_batch`] wraps every unit in
//! the retry loop and keeps going after a unit is skipped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde_json::json;
use tracing::{Span, info, info_span, warn};

use crate::config::AnalysisConfig;
use crate::cost::{CostAttribute, TransportMode};
use crate::enrichment::{EnrichmentCache, EnrichmentPipeline};
use crate::error::{AnalysisError, ConfigError};
use crate::geodesy::WebMercator;
use crate::io;
use crate::matrix::MatrixPlanner;
use crate::model::{CollectionExt, Feature, FeatureCollection, FeatureExt, PointSet};
use crate::output::{self, OutputLayout};
use crate::resolver::{Resolution, VertexResolver};
use crate::retry::{BatchOutcome, BatchRunner, RetryPolicy};
use crate::scheduler::{CostRun, PairScheduler};
use crate::summary::{self, SummaryAssembler, TOTAL_TRAVEL_TIME};
use crate::traits::{CoordinateTransform, LayerMerge, NoLayerMerge, RoutingBackend};

/// Which outputs an analysis unit produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Per-pair shortest paths and their summary CSVs.
    Routes,
    /// Bulk cost matrix and the general summary.
    Summary,
    /// Per-pair routes followed by the detailed summary over the route files.
    RoutesAndSummary,
}

impl RunMode {
    pub fn from_flags(routes: bool, summary: bool) -> Result<Self, ConfigError> {
        match (routes, summary) {
            (true, true) => Ok(RunMode::RoutesAndSummary),
            (true, false) => Ok(RunMode::Routes),
            (false, true) => Ok(RunMode::Summary),
            (false, false) => Err(ConfigError::MissingParameter("--routes or --summary")),
        }
    }

    pub fn routes(self) -> bool {
        matches!(self, RunMode::Routes | RunMode::RoutesAndSummary)
    }
}

/// Cost attributes requested for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostSelection {
    /// Every attribute the transport mode allows.
    All,
    /// Attributes by CLI name, checked against the transport mode.
    Named(Vec<String>),
}

impl CostSelection {
    pub fn resolve(&self, mode: TransportMode) -> Result<Vec<CostAttribute>, ConfigError> {
        match self {
            CostSelection::All => Ok(mode.cost_attributes().to_vec()),
            CostSelection::Named(names) if names.is_empty() => {
                Err(ConfigError::MissingParameter("cost attribute"))
            }
            CostSelection::Named(names) => {
                let mut costs = Vec::with_capacity(names.len());
                for name in names {
                    let cost = mode.cost_attribute(name)?;
                    if !costs.contains(&cost) {
                        costs.push(cost);
                    }
                }
                Ok(costs)
            }
        }
    }
}

/// One origin file analysed against one destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisUnit {
    pub origins: PathBuf,
    pub destinations: PathBuf,
    /// Prepended to every summary file name of the unit.
    pub prefix: String,
}

impl AnalysisUnit {
    /// `<originFile>_<destinationFile>`, used in logs and retry messages.
    pub fn label(&self) -> String {
        format!("{}_{}", file_name(&self.origins), file_name(&self.destinations))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Analysis units for a run.
///
/// Without entry lists the two paths are point files and form a single unit
/// prefixed `<originFile>_<destinationFile>`. With entry lists they are
/// directories; every `*.geojson` origin file is paired with every
/// `*.geojson` destination file, in path order, with prefix
/// `<originFile>_<destinationFile>-`.
pub fn discover_units(
    origins: &Path,
    destinations: &Path,
    entry_list: bool,
) -> Result<Vec<AnalysisUnit>, AnalysisError> {
    if !entry_list {
        let mut unit = AnalysisUnit {
            origins: origins.to_path_buf(),
            destinations: destinations.to_path_buf(),
            prefix: String::new(),
        };
        unit.prefix = unit.label();
        return Ok(vec![unit]);
    }

    let origin_files = geojson_files(origins)?;
    let destination_files = geojson_files(destinations)?;
    let mut units = Vec::with_capacity(origin_files.len() * destination_files.len());
    for origin in &origin_files {
        for destination in &destination_files {
            let mut unit = AnalysisUnit {
                origins: origin.clone(),
                destinations: destination.clone(),
                prefix: String::new(),
            };
            unit.prefix = format!("{}-", unit.label());
            units.push(unit);
        }
    }
    Ok(units)
}

fn geojson_files(dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| AnalysisError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "geojson"))
        .collect();
    files.sort();
    Ok(files)
}

/// Logging context and output layout of one analysis unit.
pub struct BatchContext {
    pub span: Span,
    pub layout: OutputLayout,
}

impl BatchContext {
    pub fn new(unit: &AnalysisUnit, output: &Path) -> Self {
        let span = info_span!(
            "batch",
            unit = %unit.label(),
            output = %output.display()
        );
        Self {
            span,
            layout: OutputLayout::new(output),
        }
    }
}

/// Caches scoped to one attempt at one analysis unit.
pub struct Session {
    pub resolver: VertexResolver,
    pub enrichment: EnrichmentCache,
}

/// General summary artifacts of one cost attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralSummary {
    pub cost: CostAttribute,
    pub features: usize,
    pub geojson: PathBuf,
    pub csv: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitReport {
    pub cost_runs: Vec<CostRun>,
    pub general_summaries: Vec<GeneralSummary>,
    pub detailed_summaries: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub completed: Vec<(String, UnitReport)>,
    pub skipped: Vec<String>,
}

pub struct Analyst {
    backend: Arc<dyn RoutingBackend>,
    transform: Arc<dyn CoordinateTransform>,
    merger: Arc<dyn LayerMerge>,
    config: AnalysisConfig,
    pool: Arc<ThreadPool>,
}

impl Analyst {
    /// Validate `config` and start the worker pool.
    pub fn new(backend: Arc<dyn RoutingBackend>, config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.parallelism.workers)
            .thread_name(|index| format!("travel-matrix-{index}"))
            .build()?;
        Ok(Self {
            backend,
            transform: Arc::new(WebMercator),
            merger: Arc::new(NoLayerMerge),
            config,
            pool: Arc::new(pool),
        })
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn CoordinateTransform>) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_layer_merge(mut self, merger: Arc<dyn LayerMerge>) -> Self {
        self.merger = merger;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Fresh caches for one attempt.
    pub fn session(&self) -> Session {
        let point_identifier = self.config.output.point_identifier.clone();
        Session {
            resolver: VertexResolver::new(
                self.backend.clone(),
                self.transform.clone(),
                self.config.search.clone(),
                point_identifier.clone(),
            ),
            enrichment: EnrichmentCache::new(
                EnrichmentPipeline::standard(&self.config, self.transform.clone()),
                point_identifier,
            ),
        }
    }

    /// Add `total_travel_time` to every feature.
    pub fn calculate_total_travel_time(
        &self,
        features: &mut [Feature],
        cost: CostAttribute,
    ) -> Result<(), AnalysisError> {
        self.pool.install(|| {
            features.par_iter_mut().try_for_each(|feature| {
                let properties = feature.properties_mut();
                let total = summary::total_travel_time(properties, cost)?;
                properties.insert(TOTAL_TRAVEL_TIME.to_string(), json!(total));
                Ok(())
            })
        })
    }

    /// Matrix path for one cost attribute: bulk costs for every resolved
    /// pair, joined with the enrichment of both ends, exported as GeoJSON and
    /// as the renamed CSV table, both added to the summary archives.
    pub fn create_general_summary(
        &self,
        session: &Session,
        origins: &PointSet,
        destinations: &PointSet,
        cost: CostAttribute,
        layout: &OutputLayout,
        prefix: &str,
    ) -> Result<GeneralSummary, AnalysisError> {
        let started = Instant::now();
        let resolved_origins = self.resolve_points(session, origins)?;
        let resolved_destinations = self.resolve_points(session, destinations)?;

        let planner = MatrixPlanner::new(
            self.backend.clone(),
            self.pool.clone(),
            self.config.parallelism.max_vertices_block,
        );
        let origin_ids: Vec<_> = resolved_origins.iter().map(|r| r.vertex_id).collect();
        let destination_ids: Vec<_> = resolved_destinations.iter().map(|r| r.vertex_id).collect();
        let costs = planner.compute_matrix(&origin_ids, &destination_ids, cost)?;

        let assembler = SummaryAssembler {
            enrichment: &session.enrichment,
            transform: self.transform.as_ref(),
            pool: &self.pool,
        };
        let mut features =
            assembler.assemble(&resolved_origins, &resolved_destinations, &costs, cost)?;
        self.calculate_total_travel_time(&mut features, cost)?;

        let output = &self.config.output;
        let table = summary::rename_and_subset(&features, &output.matrix_columns())?;
        let count = features.len();

        let geojson = layout.general_summary(cost, prefix);
        // Cost geometries come back in the backend's CRS.
        let collection =
            FeatureCollection::from_features(features).with_crs(self.backend.working_crs());
        output::write_geojson(&geojson, &collection)?;
        let csv = layout.general_summary_csv(cost, prefix);
        table.write_csv(&csv, output.csv_delimiter())?;

        output::compress_into_zip(&layout.general_summary_zip(), &geojson)?;
        output::compress_into_zip(&layout.general_summary_csv_zip(), &csv)?;
        if !output.debug {
            output::remove_if_exists(&geojson)?;
            output::remove_if_exists(&csv)?;
        }

        info!(
            %cost,
            features = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "general summary written"
        );
        Ok(GeneralSummary {
            cost,
            features: count,
            geojson,
            csv,
        })
    }

    /// Summarise the stored route files of `cost`.
    pub fn create_detailed_summary(
        &self,
        cost: CostAttribute,
        layout: &OutputLayout,
        prefix: &str,
    ) -> Result<PathBuf, AnalysisError> {
        let collection = summary::create_detailed_summary(&layout.routes_dir(cost))?;
        let path = layout.detailed_summary(cost, prefix);
        output::write_geojson(&path, &collection)?;
        info!(%cost, routes = collection.features.len(), "detailed summary written");
        Ok(path)
    }

    /// One attempt at `unit`.
    pub fn execute(
        &self,
        unit: &AnalysisUnit,
        mode: RunMode,
        costs: &[CostAttribute],
        layout: &OutputLayout,
    ) -> Result<UnitReport, AnalysisError> {
        let started = Instant::now();
        let origins = self.merger.merge(io::read_point_set(&unit.origins)?)?;
        let destinations = self.merger.merge(io::read_point_set(&unit.destinations)?)?;
        info!(
            origins = origins.features.len(),
            destinations = destinations.features.len(),
            ?mode,
            "Routing Data Analysis started"
        );

        let session = self.session();
        let mut report = UnitReport::default();
        if mode.routes() {
            let scheduler = PairScheduler {
                backend: self.backend.as_ref(),
                transform: self.transform.as_ref(),
                resolver: &session.resolver,
                enrichment: &session.enrichment,
                pool: &self.pool,
                output: &self.config.output,
            };
            report.cost_runs =
                scheduler.compute_all(&origins, &destinations, costs, layout, &unit.prefix)?;

            if mode == RunMode::RoutesAndSummary {
                if self.config.output.store_route_files {
                    for &cost in costs {
                        report
                            .detailed_summaries
                            .push(self.create_detailed_summary(cost, layout, &unit.prefix)?);
                    }
                } else {
                    warn!("route files are not stored, detailed summary skipped");
                }
            }
        } else {
            for &cost in costs {
                report.general_summaries.push(self.create_general_summary(
                    &session,
                    &origins,
                    &destinations,
                    cost,
                    layout,
                    &unit.prefix,
                )?);
            }
        }

        info!(
            resolved = session.resolver.cached(),
            backend_lookups = session.resolver.backend_calls(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Routing Data Analysis finished"
        );
        Ok(report)
    }

    /// Run every unit under the retry loop. A skipped unit does not stop
    /// the ones after it.
    pub fn run_batch(
        &self,
        units: &[AnalysisUnit],
        mode: RunMode,
        costs: &[CostAttribute],
        output: &Path,
    ) -> BatchReport {
        let started = Instant::now();
        let mut runner = BatchRunner::new(RetryPolicy::from(&self.config.retry));
        let mut report = BatchReport::default();

        for unit in units {
            let context = BatchContext::new(unit, output);
            let _entered = context.span.enter();
            let label = unit.label();
            match runner.run(&label, |_| self.execute(unit, mode, costs, &context.layout)) {
                BatchOutcome::Success { value, .. } => report.completed.push((label, value)),
                BatchOutcome::Skipped { .. } => report.skipped.push(label),
            }
        }

        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        report
    }

    /// Resolve every point of `set`; points that cannot be snapped are left
    /// out.
    fn resolve_points(
        &self,
        session: &Session,
        set: &PointSet,
    ) -> Result<Vec<Resolution>, AnalysisError> {
        let span = Span::current();
        let resolved = self.pool.install(|| {
            set.features
                .par_iter()
                .map(|feature| {
                    let _entered = span.enter();
                    match session.resolver.resolve(feature, &set.crs) {
                        Ok(resolution) => Ok(Some(resolution)),
                        Err(e) if e.is_point_local() => {
                            warn!(error = %e, set = %set.name, "point left out of the matrix");
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    }
                })
                .collect::<Result<Vec<_>, AnalysisError>>()
        })?;
        Ok(resolved.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_flags() {
        assert_eq!(RunMode::from_flags(true, true).unwrap(), RunMode::RoutesAndSummary);
        assert_eq!(RunMode::from_flags(false, true).unwrap(), RunMode::Summary);
        assert!(RunMode::Routes.routes());
        assert!(!RunMode::Summary.routes());
        assert!(matches!(
            RunMode::from_flags(false, false),
            Err(ConfigError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_cost_selection() {
        let all = CostSelection::All.resolve(TransportMode::Bicycle).unwrap();
        assert_eq!(all, TransportMode::Bicycle.cost_attributes().to_vec());

        let named = CostSelection::Named(vec!["distance".into(), "BICYCLE_FAST_TIME".into()])
            .resolve(TransportMode::Bicycle)
            .unwrap();
        assert_eq!(named, vec![CostAttribute::Distance, CostAttribute::BicycleFastTime]);

        let err = CostSelection::Named(vec!["RUSH_HOUR_DELAY".into()])
            .resolve(TransportMode::Bicycle)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCostAttribute { .. }));
        assert!(CostSelection::Named(Vec::new())
            .resolve(TransportMode::PrivateCar)
            .is_err());
    }

    #[test]
    fn test_single_unit_prefix() {
        let units =
            discover_units(Path::new("in/a.geojson"), Path::new("in/b.geojson"), false).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].prefix, "a.geojson_b.geojson");
    }
}
