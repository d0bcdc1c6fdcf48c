//! Error taxonomy for the routing-cost engine.
//!
//! Configuration problems abort a run before any work starts, resolution
//! misses are absorbed per point, and everything else bubbles up to the
//! batch retry loop.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or incomplete run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required parameter was not supplied.
    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),
    /// A cost attribute name is unknown or not available for the mode.
    #[error("cost attribute `{name}` is not available for transport mode {mode}")]
    UnknownCostAttribute { name: String, mode: String },
    /// No transport mode was selected.
    #[error("transport mode not selected (allowed: BICYCLE, PRIVATE_CAR)")]
    TransportModeNotSelected,
    /// The transport mode name is not recognised.
    #[error("unknown transport mode `{0}` (allowed: BICYCLE, PRIVATE_CAR)")]
    UnknownTransportMode(String),
    /// A configuration value is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    /// The configuration file could not be read.
    #[error("failed to read configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for [`crate::config::AnalysisConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure talking to the routing backend.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("request to {url} failed with HTTP {status}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
    },
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("malformed backend response: {message}")]
    Parse { message: String },
    /// The backend answered but reported an error of its own.
    #[error("backend error: {message}")]
    Service { message: String },
}

/// Coordinate reprojection failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("no transformation from {from} to {to}")]
    Unsupported { from: String, to: String },
}

/// Any failure raised while analysing one origin/destination file pair.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    /// No routable vertex within the widest search radius.
    #[error("no routable vertex found for point {point_id} within {radius} m")]
    VertexNotFound { point_id: String, radius: f64 },
    #[error("feature has no `{key}` identifier property")]
    MissingIdentifier { key: String },
    #[error("missing property `{key}`")]
    MissingProperty { key: String },
    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("{path:?} is not a GeoJSON FeatureCollection")]
    NotFeatureCollection { path: PathBuf },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl AnalysisError {
    /// Wrap an IO error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure concerns a single point and should only skip the
    /// records involving it.
    pub fn is_point_local(&self) -> bool {
        matches!(self, Self::VertexNotFound { .. })
    }
}
