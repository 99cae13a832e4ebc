//! Dataset construction
//!
//! Reads the raw rental table, cleans it onto a gap-free hourly timeline,
//! derives lag features and splits the result chronologically by year.

pub mod catalog;
pub mod expand;
pub mod frame;
pub mod impute;
pub mod reader;
pub mod record;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use catalog::{FeatureGroups, aggregate_features};
pub use expand::{LagNames, expand_dataset};
pub use frame::{FeatureMatrix, FrameError, TimeFrame};
pub use impute::{ImputeError, clean_dataset};
pub use reader::{CsvDatasetReader, DatasetCache, DatasetReader, MemoryReader};
pub use record::{Observation, RawObservation};

/// Base columns of the feature matrix, ahead of the lag columns.
pub const BASE_FEATURE_COLUMNS: [&str; 12] = [
    "season",
    "yr",
    "mnth",
    "hr",
    "holiday",
    "weekday",
    "workingday",
    "weathersit",
    "temp",
    "atemp",
    "hum",
    "windspeed",
];

/// Column predicted by the model.
pub const TARGET_COLUMN: &str = "cnt";

/// Column used for the chronological split.
pub const YEAR_COLUMN: &str = "yr";

/// Errors raised while building the dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("dataset contains no rows")]
    Empty,
    #[error("invalid hour {hour} on {date}")]
    InvalidHour { date: NaiveDate, hour: u32 },
    #[error("duplicate observation for {0}")]
    DuplicateTimestamp(NaiveDateTime),
    #[error(transparent)]
    Impute(#[from] ImputeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Named chronological partition of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitName {
    Train,
    Test,
}

impl SplitName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitName::Train => "train",
            SplitName::Test => "test",
        }
    }
}

impl fmt::Display for SplitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown split '{0}', expected 'train' or 'test'")]
pub struct UnknownSplit(String);

impl FromStr for SplitName {
    type Err = UnknownSplit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(SplitName::Train),
            "test" => Ok(SplitName::Test),
            other => Err(UnknownSplit(other.to_string())),
        }
    }
}

/// Features and target of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub features: FeatureMatrix,
    pub target: Array1<f64>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

/// The requested splits, in request order, with the lag names used to build
/// them.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub splits: Vec<(SplitName, Split)>,
    pub lags: LagNames,
}

impl Dataset {
    pub fn split(&self, name: SplitName) -> Option<&Split> {
        self.splits
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, split)| split)
    }

    pub fn take_split(&mut self, name: SplitName) -> Option<Split> {
        let pos = self.splits.iter().position(|(n, _)| *n == name)?;
        Some(self.splits.remove(pos).1)
    }

    pub fn feature_groups(&self) -> FeatureGroups {
        FeatureGroups::from(&self.lags)
    }
}

/// Ordered columns of the feature matrix: base columns, then count lags,
/// calendar lags and weather lags.
pub fn feature_columns(lags: &LagNames) -> Vec<String> {
    BASE_FEATURE_COLUMNS
        .iter()
        .map(|s| s.to_string())
        .chain(lags.count.iter().cloned())
        .chain(lags.categorical.iter().cloned())
        .chain(lags.numeric.iter().cloned())
        .collect()
}

/// Read, clean, expand and split the dataset.
///
/// Rows whose year is in `years_train` form the train split, all others the
/// test split. Only `splits` are returned.
pub fn get_dataset(
    reader: &dyn DatasetReader,
    splits: &[SplitName],
    years_train: &[i32],
) -> Result<Dataset, DatasetError> {
    let raw = reader.read()?;
    let cleaned = clean_dataset(&raw)?;
    let (frame, lags) = expand_dataset(TimeFrame::from_observations(&cleaned)?)?;

    let features = frame.select(&feature_columns(&lags))?;
    let target = frame.dense(TARGET_COLUMN)?;
    let years = features.column(YEAR_COLUMN)?;

    let (train_rows, test_rows): (Vec<usize>, Vec<usize>) =
        (0..features.n_rows()).partition(|&i| years_train.contains(&(years[i] as i32)));

    tracing::info!(
        train = train_rows.len(),
        test = test_rows.len(),
        ?years_train,
        "Split dataset by year"
    );

    let mut requested: Vec<SplitName> = Vec::with_capacity(splits.len());
    for name in splits {
        if !requested.contains(name) {
            requested.push(*name);
        }
    }

    let splits = requested
        .into_iter()
        .map(|name| {
            let rows = match name {
                SplitName::Train => &train_rows,
                SplitName::Test => &test_rows,
            };
            let split = Split {
                features: features.take_rows(rows),
                target: rows.iter().map(|&i| target[i]).collect(),
            };
            (name, split)
        })
        .collect();

    Ok(Dataset { splits, lags })
}
