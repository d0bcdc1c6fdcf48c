//! Matrix path: bulk costs joined with the trip-end enrichment and exported
//! as the general summary.

mod common;

use std::fs::{self, File};
use std::sync::Arc;

use rstest::rstest;
use serde_json::{Value, json};
use zip::ZipArchive;

use travel_matrix::analysis::{Analyst, RunMode, discover_units};
use travel_matrix::cost::CostAttribute;
use travel_matrix::model::Crs;
use travel_matrix::output::OutputLayout;
use travel_matrix::test_support::{QueryKind, StubBackend};

use common::{approx, read_csv, read_rows, test_config, write_points};

/// Three origins pinned to vertices 101..=103, two destinations pinned to
/// 110 and 111; vertex 102 cannot reach 111.
fn pinned_backend() -> StubBackend {
    StubBackend::new(Crs::wgs84())
        .with_vertex(101, 60.1, 25.0)
        .with_vertex(102, 60.2, 25.0)
        .with_vertex(103, 60.3, 25.0)
        .with_vertex(110, 61.0, 25.0)
        .with_vertex(111, 61.1, 25.0)
        .with_missing_pair(102, 111)
}

#[rstest]
#[case(1, 6)]
#[case(100, 1)]
fn test_general_summary_rows(#[case] block_size: usize, #[case] many_to_many: usize) {
    let dir = tempfile::tempdir().unwrap();
    let origins = write_points(
        dir.path(),
        "o.geojson",
        &[(1, 60.1, 25.0), (2, 60.2, 25.0), (3, 60.3, 25.0)],
    );
    let destinations = write_points(dir.path(), "d.geojson", &[(10, 61.0, 25.0), (11, 61.1, 25.0)]);

    let mut config = test_config();
    config.parallelism.max_vertices_block = block_size;
    config.output.debug = true;
    let backend = Arc::new(pinned_backend());
    let analyst = Analyst::new(backend.clone(), config).unwrap();
    let units = discover_units(&origins, &destinations, false).unwrap();
    let layout = OutputLayout::new(dir.path().join("out"));

    let report = analyst
        .execute(&units[0], RunMode::Summary, &[CostAttribute::Distance], &layout)
        .unwrap();

    let summary = &report.general_summaries[0];
    assert_eq!(summary.features, 5);
    assert_eq!(backend.calls(QueryKind::ManyToMany), many_to_many);
    assert_eq!(backend.calls(QueryKind::NearestRoutableVertex), 5);
    assert_eq!(backend.calls(QueryKind::ShortestPath), 0);

    let rows = read_csv(&summary.csv);
    assert_eq!(rows[0], vec!["ykr_from_id", "ykr_to_id", "travel_time"]);
    assert_eq!(rows.len(), 6);
    assert!(!rows.iter().any(|row| row[0] == "2" && row[1] == "11"));

    // 180 m walked at 70 m/min at each end, 0.42 min parking, cost |101 - 110| + 1.
    let row = rows
        .iter()
        .find(|row| row[0] == "1" && row[1] == "10")
        .unwrap();
    approx(&row[2], 2.0 * 180.0 / 70.0 + 0.42 + 10.0);

    assert!(summary.geojson.exists());
    assert!(layout.general_summary_zip().exists());
    assert!(layout.general_summary_csv_zip().exists());
}

#[test]
fn test_intermediates_live_only_in_archives() {
    let dir = tempfile::tempdir().unwrap();
    let origins = write_points(dir.path(), "o.geojson", &[(1, 60.1, 25.0), (2, 60.2, 25.0)]);
    let destinations = write_points(dir.path(), "d.geojson", &[(10, 61.0, 25.0)]);
    let analyst = Analyst::new(Arc::new(pinned_backend()), test_config()).unwrap();
    let units = discover_units(&origins, &destinations, false).unwrap();
    let layout = OutputLayout::new(dir.path().join("out"));

    let report = analyst
        .execute(
            &units[0],
            RunMode::Summary,
            &[CostAttribute::Distance, CostAttribute::BicycleFastTime],
            &layout,
        )
        .unwrap();

    assert_eq!(report.general_summaries.len(), 2);
    for summary in &report.general_summaries {
        assert!(!summary.geojson.exists());
        assert!(!summary.csv.exists());
    }

    let mut archive = ZipArchive::new(File::open(layout.general_summary_csv_zip()).unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
    let name = format!("distance_{}generalSummary.csv", units[0].prefix);
    let rows = read_rows(archive.by_name(&name).unwrap());
    assert_eq!(rows.len(), 3);

    let geojson = ZipArchive::new(File::open(layout.general_summary_zip()).unwrap()).unwrap();
    assert_eq!(geojson.len(), 2);
}

#[test]
fn test_coinciding_points_produce_no_row() {
    let dir = tempfile::tempdir().unwrap();
    let points = [(1, 60.1, 25.0), (2, 60.2, 25.0)];
    let origins = write_points(dir.path(), "o.geojson", &points);
    let destinations = write_points(dir.path(), "d.geojson", &points);
    let analyst = Analyst::new(Arc::new(pinned_backend()), test_config()).unwrap();
    let units = discover_units(&origins, &destinations, false).unwrap();
    let layout = OutputLayout::new(dir.path().join("out"));

    let report = analyst
        .execute(&units[0], RunMode::Summary, &[CostAttribute::Distance], &layout)
        .unwrap();

    assert_eq!(report.general_summaries[0].features, 2);
    let mut archive = ZipArchive::new(File::open(layout.general_summary_csv_zip()).unwrap()).unwrap();
    let name = format!("distance_{}generalSummary.csv", units[0].prefix);
    let rows = read_rows(archive.by_name(&name).unwrap());
    assert_eq!(rows.len(), 3);
    assert!(!rows.iter().any(|row| row[0] == row[1]));
}

#[test]
fn test_summary_geojson_carries_backend_crs_and_trip_ends() {
    let dir = tempfile::tempdir().unwrap();
    let origins = write_points(dir.path(), "o.geojson", &[(1, 60.1, 25.0)]);
    let destinations = write_points(dir.path(), "d.geojson", &[(10, 61.0, 25.0)]);
    let mut config = test_config();
    config.output.debug = true;
    let analyst = Analyst::new(Arc::new(StubBackend::new(Crs::web_mercator())), config).unwrap();
    let units = discover_units(&origins, &destinations, false).unwrap();
    let layout = OutputLayout::new(dir.path().join("out"));

    let report = analyst
        .execute(&units[0], RunMode::Summary, &[CostAttribute::Distance], &layout)
        .unwrap();

    let summary = &report.general_summaries[0];
    let written: Value =
        serde_json::from_str(&fs::read_to_string(&summary.geojson).unwrap()).unwrap();
    assert_eq!(written["crs"]["properties"]["name"], json!("EPSG:3857"));

    let properties = &written["features"][0]["properties"];
    assert!(properties["startVertexId"].is_i64());
    assert!(properties["endVertexId"].is_i64());
    assert_ne!(properties["startVertexId"], properties["endVertexId"]);
    for key in [
        "selectedStartCoordinates",
        "selectedEndCoordinates",
        "nearestStartCoordinates",
        "nearestEndCoordinates",
    ] {
        assert_eq!(properties[key].as_array().map(Vec::len), Some(2), "{key}");
    }
    // Trip-end coordinates stay in the input CRS.
    assert_eq!(properties["selectedStartCoordinates"], json!([25.0, 60.1]));
    assert_eq!(properties["selectedEndCoordinates"], json!([25.0, 61.0]));
}
