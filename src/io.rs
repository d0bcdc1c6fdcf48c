//! GeoJSON point-file reading.

use std::fs;
use std::path::Path;

use geojson::GeoJson;

use crate::error::AnalysisError;
use crate::model::{CollectionExt, Crs, FeatureCollection, PointSet};

/// Read a GeoJSON feature collection of points. The set is named after the
/// file stem.
pub fn read_point_set(path: &Path) -> Result<PointSet, AnalysisError> {
    let text = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
    let collection = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection,
        _ => {
            return Err(AnalysisError::NotFeatureCollection {
                path: path.to_path_buf(),
            });
        }
    };
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(PointSet {
        name,
        crs: extract_crs(&collection),
        features: collection.features,
    })
}

/// CRS named in a collection's `crs` member; WGS84 when absent or unreadable.
pub fn extract_crs(collection: &FeatureCollection) -> Crs {
    collection.named_crs().unwrap_or_else(Crs::wgs84)
}
