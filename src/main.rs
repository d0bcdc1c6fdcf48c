use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use travel_matrix::analysis::{Analyst, CostSelection, RunMode, discover_units};
use travel_matrix::config::AnalysisConfig;
use travel_matrix::cost::TransportMode;
use travel_matrix::error::{AnalysisError, ConfigError};
use travel_matrix::wfs::WfsBackend;

/// Door-to-door travel times and distances between two sets of points.
#[derive(Debug, Parser)]
#[command(name = "travel-matrix", version, about)]
struct Cli {
    /// Origin points (GeoJSON), or a directory of them with --is-entry-list.
    #[arg(short = 's', long)]
    origins: PathBuf,

    /// Destination points (GeoJSON), or a directory of them with --is-entry-list.
    #[arg(short = 'e', long)]
    destinations: PathBuf,

    /// Output folder.
    #[arg(short, long)]
    output: PathBuf,

    /// Comma separated cost attributes, e.g. DISTANCE,BICYCLE_FAST_TIME.
    #[arg(short, long, value_delimiter = ',')]
    costs: Vec<String>,

    /// BICYCLE or PRIVATE_CAR.
    #[arg(short = 't', long, default_value = "")]
    transport_mode: String,

    /// Route every pair and store the per-pair summaries.
    #[arg(long)]
    routes: bool,

    /// Write the summary; with --routes, the detailed summary of the routes.
    #[arg(long)]
    summary: bool,

    /// Treat --origins and --destinations as directories of point files.
    #[arg(long)]
    is_entry_list: bool,

    /// Use every cost attribute of the transport mode.
    #[arg(long)]
    all: bool,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `backend.url` from the configuration.
    #[arg(long)]
    backend_url: Option<String>,
}

fn main() -> Result<(), AnalysisError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_toml_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(url) = cli.backend_url {
        config.backend.url = url;
    }

    let mode = TransportMode::parse(&cli.transport_mode)?;
    let run_mode = RunMode::from_flags(cli.routes, cli.summary)?;
    let selection = if cli.all {
        CostSelection::All
    } else {
        CostSelection::Named(cli.costs)
    };
    let costs = selection.resolve(mode)?;
    if !cli.is_entry_list && !cli.origins.is_file() {
        return Err(ConfigError::Invalid {
            field: "origins",
            reason: format!("{} is not a file", cli.origins.display()),
        }
        .into());
    }

    let units = discover_units(&cli.origins, &cli.destinations, cli.is_entry_list)?;
    let backend = WfsBackend::new(config.backend.clone(), mode)?;
    let analyst = Analyst::new(Arc::new(backend), config)?;

    info!(
        units = units.len(),
        %mode,
        ?run_mode,
        costs = ?costs,
        "starting analysis"
    );
    let report = analyst.run_batch(&units, run_mode, &costs, &cli.output);
    for label in &report.skipped {
        warn!(unit = %label, "analysis unit skipped after repeated failures");
    }
    Ok(())
}
