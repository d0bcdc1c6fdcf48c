//! Run configuration, loaded from TOML.
//!
//! Every field is optional in the file; missing values take the defaults
//! below. [`AnalysisConfig::validate`] runs before any work starts.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::wfs::WfsConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub parallelism: ParallelismConfig,
    pub search: SearchConfig,
    pub retry: RetryConfig,
    pub walking: WalkingConfig,
    pub parking: ParkingConfig,
    pub output: OutputConfig,
    pub backend: WfsConfig,
}

impl AnalysisConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism.workers == 0 {
            return Err(invalid("parallelism.workers", "must be at least 1"));
        }
        if self.parallelism.max_vertices_block == 0 {
            return Err(invalid("parallelism.max_vertices_block", "must be at least 1"));
        }
        if self.search.initial_radius <= 0.0 {
            return Err(invalid("search.initial_radius", "must be positive"));
        }
        if self.search.radius_increment < 0.0 {
            return Err(invalid("search.radius_increment", "must not be negative"));
        }
        if self.walking.speed <= 0.0 {
            return Err(invalid("walking.speed", "must be positive"));
        }
        if self.walking.default_distance < 0.0 {
            return Err(invalid("walking.default_distance", "must not be negative"));
        }
        if self.parking.default_time < 0.0 {
            return Err(invalid("parking.default_time", "must not be negative"));
        }
        if self.output.point_identifier.trim().is_empty() {
            return Err(invalid("output.point_identifier", "must not be empty"));
        }
        if !self.output.csv_separator.is_ascii() {
            return Err(invalid("output.csv_separator", "must be a single ASCII character"));
        }
        if self.output.summary_header.len() != 4 {
            return Err(invalid(
                "output.summary_header",
                "must name four columns: origin, destination, distance, travel time",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParallelismConfig {
    /// Worker threads shared by every fan-out phase.
    pub workers: usize,
    /// Vertex ids per block in chunked many-to-many queries.
    pub max_vertices_block: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_vertices_block: 100,
        }
    }
}

/// Nearest-vertex search. The widest radius tried is
/// `initial_radius + max_widen_attempts * radius_increment`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub initial_radius: f64,
    pub radius_increment: f64,
    pub max_widen_attempts: u32,
    /// When false the plain nearest-vertex query is used, without a radius.
    pub routable_only: bool,
}

impl SearchConfig {
    pub fn max_radius(&self) -> f64 {
        self.initial_radius + f64::from(self.max_widen_attempts) * self.radius_increment
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_radius: 500.0,
            radius_increment: 500.0,
            max_widen_attempts: 5,
            routable_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub short_wait_secs: u64,
    pub long_wait_secs: u64,
}

impl RetryConfig {
    pub fn short_wait(&self) -> Duration {
        Duration::from_secs(self.short_wait_secs)
    }

    pub fn long_wait(&self) -> Duration {
        Duration::from_secs(self.long_wait_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            short_wait_secs: 10,
            long_wait_secs: 480,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalkingConfig {
    /// Metres walked to and from the network when a point has no override.
    pub default_distance: f64,
    /// Metres per minute.
    pub speed: f64,
    pub distance_attribute: String,
}

impl Default for WalkingConfig {
    fn default() -> Self {
        Self {
            default_distance: 180.0,
            speed: 70.0,
            distance_attribute: "walking_distance".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParkingConfig {
    /// Minutes.
    pub default_time: f64,
    pub time_attribute: String,
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self {
            default_time: 0.42,
            time_attribute: "parking_time".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub point_identifier: String,
    /// Keeps intermediate files that are otherwise deleted once zipped.
    pub debug: bool,
    pub store_route_files: bool,
    pub csv_separator: char,
    pub summary_header: Vec<String>,
    /// Exported matrix columns, in order. Defaults to origin id, destination
    /// id and travel time keyed by the point identifier.
    pub matrix_columns: Option<Vec<ColumnRename>>,
}

impl OutputConfig {
    pub fn matrix_columns(&self) -> Vec<ColumnRename> {
        if let Some(columns) = &self.matrix_columns {
            return columns.clone();
        }
        let id = &self.point_identifier;
        vec![
            ColumnRename {
                from: format!("startPoint_{id}"),
                to: "ykr_from_id".to_string(),
            },
            ColumnRename {
                from: format!("endPoint_{id}"),
                to: "ykr_to_id".to_string(),
            },
            ColumnRename {
                from: "total_travel_time".to_string(),
                to: "travel_time".to_string(),
            },
        ]
    }

    pub fn csv_delimiter(&self) -> u8 {
        u8::try_from(self.csv_separator).unwrap_or(b';')
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            point_identifier: "id".to_string(),
            debug: false,
            store_route_files: true,
            csv_separator: ';',
            summary_header: ["ykr_from_id", "ykr_to_id", "total_distance", "travel_time"]
                .into_iter()
                .map(String::from)
                .collect(),
            matrix_columns: None,
        }
    }
}
