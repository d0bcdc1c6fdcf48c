//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use travel_matrix::config::AnalysisConfig;

/// Write a WGS84 point file; each point is `(id, lat, lng)`.
pub fn write_points(dir: &Path, name: &str, points: &[(i64, f64, f64)]) -> PathBuf {
    let features: Vec<Value> = points
        .iter()
        .map(|(id, lat, lng)| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [lng, lat] },
                "properties": { "id": id }
            })
        })
        .collect();
    let collection = json!({ "type": "FeatureCollection", "features": features });
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string(&collection).unwrap()).unwrap();
    path
}

/// Defaults with no retry waits and a small pool.
pub fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.parallelism.workers = 4;
    config.retry.short_wait_secs = 0;
    config.retry.long_wait_secs = 0;
    config
}

/// Rows of a `;` separated file, header included.
pub fn read_rows(reader: impl std::io::Read) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_reader(reader)
        .records()
        .map(|record| record.unwrap().iter().map(String::from).collect())
        .collect()
}

pub fn read_csv(path: &Path) -> Vec<Vec<String>> {
    read_rows(fs::File::open(path).unwrap())
}

pub fn approx(actual: &str, expected: f64) {
    let actual: f64 = actual.parse().unwrap();
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}
