//! Output folder layout and the artifact writers.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::cost::CostAttribute;
use crate::error::AnalysisError;
use crate::model::PairSummary;

/// Where every artifact of a run lands, relative to the output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn routes_dir(&self, cost: CostAttribute) -> PathBuf {
        self.root.join("geoms").join(cost.english_name())
    }

    pub fn summary_dir(&self) -> PathBuf {
        self.root.join("summary")
    }

    /// Deterministic per pair, so reruns overwrite.
    pub fn route_file(&self, cost: CostAttribute, origin: &str, destination: &str) -> PathBuf {
        self.routes_dir(cost).join(format!(
            "shortestPath-{}-{origin}-{destination}.geojson",
            cost.english_name()
        ))
    }

    pub fn pair_summary_csv(&self, cost: CostAttribute, prefix: &str) -> PathBuf {
        self.summary_dir()
            .join(format!("{prefix}{}_costSummary.csv", cost.english_name()))
    }

    pub fn pair_summary_zip(&self, cost: CostAttribute) -> PathBuf {
        self.summary_dir()
            .join(format!("{}_summary_csv.zip", cost.english_name()))
    }

    pub fn detailed_summary(&self, cost: CostAttribute, prefix: &str) -> PathBuf {
        self.summary_dir()
            .join(format!("{}_{prefix}detailedSummary.geojson", cost.english_name()))
    }

    pub fn general_summary(&self, cost: CostAttribute, prefix: &str) -> PathBuf {
        self.summary_dir()
            .join(format!("{}_{prefix}generalSummary.geojson", cost.english_name()))
    }

    pub fn general_summary_csv(&self, cost: CostAttribute, prefix: &str) -> PathBuf {
        self.summary_dir()
            .join(format!("{}_{prefix}generalSummary.csv", cost.english_name()))
    }

    pub fn general_summary_zip(&self) -> PathBuf {
        self.summary_dir().join("summary.zip")
    }

    pub fn general_summary_csv_zip(&self) -> PathBuf {
        self.summary_dir().join("summary_csv.zip")
    }
}

/// Shared append target for pair summary rows. Appends from concurrent
/// workers are serialised through one lock.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl SummaryWriter {
    /// Truncate `path` and write the header row.
    pub fn create(path: &Path, header: &[String], delimiter: u8) -> Result<Self, AnalysisError> {
        ensure_parent(path)?;
        let file = File::create(path).map_err(|e| AnalysisError::io(path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(file);
        writer.write_record(header)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    pub fn append(&self, row: &PairSummary) -> Result<(), AnalysisError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_record(row.to_record())?;
        Ok(())
    }

    /// Flush and return the file path.
    pub fn finish(self) -> Result<PathBuf, AnalysisError> {
        let mut writer = self
            .writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        writer.flush().map_err(|e| AnalysisError::io(&self.path, e))?;
        Ok(self.path)
    }
}

fn ensure_parent(path: &Path) -> Result<(), AnalysisError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AnalysisError::io(parent, e))?;
    }
    Ok(())
}

pub fn write_geojson<T: Serialize>(path: &Path, value: &T) -> Result<(), AnalysisError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| AnalysisError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| AnalysisError::io(path, e))
}

/// Add `file` to the archive at `zip_path`, creating the archive when absent.
/// An entry with the same name is replaced.
pub fn compress_into_zip(zip_path: &Path, file: &Path) -> Result<(), AnalysisError> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            AnalysisError::io(
                file,
                io::Error::new(io::ErrorKind::InvalidInput, "file has no UTF-8 name"),
            )
        })?
        .to_string();

    let staging = zip_path.with_extension("zip.partial");
    ensure_parent(zip_path)?;
    let mut writer =
        ZipWriter::new(File::create(&staging).map_err(|e| AnalysisError::io(&staging, e))?);

    if zip_path.exists() {
        let existing = File::open(zip_path).map_err(|e| AnalysisError::io(zip_path, e))?;
        let mut archive = ZipArchive::new(existing)?;
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            if entry.name() == name {
                continue;
            }
            writer.raw_copy_file(entry)?;
        }
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    writer.start_file(name, options)?;
    let mut source = File::open(file).map_err(|e| AnalysisError::io(file, e))?;
    io::copy(&mut source, &mut writer).map_err(|e| AnalysisError::io(file, e))?;
    writer.finish()?;

    fs::rename(&staging, zip_path).map_err(|e| AnalysisError::io(zip_path, e))
}

/// Empty `dir`, creating it when missing.
pub fn reset_dir(dir: &Path) -> Result<(), AnalysisError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| AnalysisError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| AnalysisError::io(dir, e))
}

pub fn remove_if_exists(path: &Path) -> Result<(), AnalysisError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(AnalysisError::io(path, e)),
        _ => Ok(()),
    }
}
