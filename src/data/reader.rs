//! Dataset readers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::ReadCache;

use super::DatasetError;
use super::record::RawObservation;

/// Cache shared by every CSV reader of a run.
pub type DatasetCache = ReadCache<Vec<RawObservation>>;

/// Source of the raw rental table.
///
/// The returned table is shared and read-only.
pub trait DatasetReader {
    fn read(&self) -> Result<Arc<Vec<RawObservation>>, DatasetError>;
}

/// Reads a CSV file through a [`DatasetCache`], so repeated reads of the same
/// path within one cache lifetime touch the file once.
#[derive(Debug)]
pub struct CsvDatasetReader<'a> {
    path: PathBuf,
    cache: &'a DatasetCache,
}

impl<'a> CsvDatasetReader<'a> {
    pub fn new(path: impl Into<PathBuf>, cache: &'a DatasetCache) -> Self {
        Self {
            path: path.into(),
            cache,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetReader for CsvDatasetReader<'_> {
    fn read(&self) -> Result<Arc<Vec<RawObservation>>, DatasetError> {
        self.cache.get_or_try_load(&self.path, read_csv)
    }
}

/// Reader over rows already in memory.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    rows: Arc<Vec<RawObservation>>,
}

impl MemoryReader {
    pub fn new(rows: Vec<RawObservation>) -> Self {
        Self {
            rows: Arc::new(rows),
        }
    }
}

impl DatasetReader for MemoryReader {
    fn read(&self) -> Result<Arc<Vec<RawObservation>>, DatasetError> {
        Ok(Arc::clone(&self.rows))
    }
}

fn read_csv(path: &Path) -> Result<Vec<RawObservation>, DatasetError> {
    let read_err = |source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(read_err)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<RawObservation>, _>>()
        .map_err(read_err)?;

    tracing::info!(path = %path.display(), rows = rows.len(), "Loaded raw dataset");
    Ok(rows)
}
