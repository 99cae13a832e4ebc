//! Column-oriented hourly frame and the dense feature matrix built from it.
//!
//! The hourly series is a polars `DataFrame` with one `Float64` column per
//! variable and an `Int64` timestamp column (seconds since the epoch) that
//! travels with the rows through null drops.

use chrono::{DateTime, NaiveDateTime};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;
use thiserror::Error;

use super::record::Observation;

/// Column holding the row timestamps.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Errors raised by frame and matrix operations.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column not found: {0}")]
    MissingColumn(String),
    #[error("column {column} has a missing value at row {row}")]
    NullValue { column: String, row: usize },
    #[error("column {column} has {found} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid timestamp {0} in frame")]
    InvalidTimestamp(i64),
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Hourly series stored as named columns sharing a timestamp column.
#[derive(Debug, Clone)]
pub struct TimeFrame {
    df: DataFrame,
}

impl TimeFrame {
    /// Create a frame holding only the given timestamps.
    pub fn new(index: &[NaiveDateTime]) -> Result<Self, FrameError> {
        let seconds: Vec<i64> = index.iter().map(|ts| ts.and_utc().timestamp()).collect();
        let df = DataFrame::new(vec![Series::new(TIMESTAMP_COLUMN, seconds)])?;
        Ok(Self { df })
    }

    /// Build a frame from cleaned observations with one column per field,
    /// calendar columns derived from the timestamp.
    pub fn from_observations(rows: &[Observation]) -> Result<Self, FrameError> {
        let fields: [(&str, fn(&Observation) -> f64); 13] = [
            ("season", |r| r.season as f64),
            ("yr", |r| r.year() as f64),
            ("mnth", |r| r.month() as f64),
            ("hr", |r| r.hour() as f64),
            ("holiday", |r| r.holiday as f64),
            ("weekday", |r| r.weekday() as f64),
            ("workingday", |r| r.workingday as f64),
            ("weathersit", |r| r.weathersit as f64),
            ("temp", |r| r.temp),
            ("atemp", |r| r.atemp),
            ("hum", |r| r.hum),
            ("windspeed", |r| r.windspeed),
            ("cnt", |r| r.cnt as f64),
        ];

        let index: Vec<NaiveDateTime> = rows.iter().map(|r| r.timestamp).collect();
        let mut frame = Self::new(&index)?;
        for (name, field) in fields {
            let values: Vec<f64> = rows.iter().map(field).collect();
            frame.df.with_column(Series::new(name, values))?;
        }

        Ok(frame)
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_frame(&self) -> &DataFrame {
        &self.df
    }

    /// Row timestamps, in row order.
    pub fn index(&self) -> Result<Vec<NaiveDateTime>, FrameError> {
        self.df
            .column(TIMESTAMP_COLUMN)?
            .i64()?
            .into_iter()
            .flatten()
            .map(|secs| {
                DateTime::from_timestamp(secs, 0)
                    .map(|ts| ts.naive_utc())
                    .ok_or(FrameError::InvalidTimestamp(secs))
            })
            .collect()
    }

    /// Names of the value columns, excluding the timestamp column.
    pub fn column_names(&self) -> Vec<&str> {
        self.df
            .get_column_names()
            .into_iter()
            .filter(|name| *name != TIMESTAMP_COLUMN)
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names().contains(&name)
    }

    pub fn column(&self, name: &str) -> Result<Vec<Option<f64>>, FrameError> {
        Ok(self.require(name)?.f64()?.into_iter().collect())
    }

    /// Add a column, replacing any existing column of the same name.
    pub fn insert_column(
        &mut self,
        name: &str,
        values: Vec<Option<f64>>,
    ) -> Result<(), FrameError> {
        if values.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                column: name.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }
        self.df.with_column(Series::new(name, values))?;
        Ok(())
    }

    /// Add `alias` holding `source` moved down by `periods` rows; the first
    /// `periods` rows of the new column are null.
    pub fn add_lag(&mut self, source: &str, periods: usize, alias: &str) -> Result<(), FrameError> {
        let mut lagged = self.require(source)?.shift(periods as i64);
        lagged.rename(alias);
        self.df.with_column(lagged)?;
        Ok(())
    }

    /// Add `alias` holding the first difference `x[i] - x[i - 1]` of
    /// `source`; null where either side is.
    pub fn add_difference(&mut self, source: &str, alias: &str) -> Result<(), FrameError> {
        let current = self.require(source)?;
        let previous = current.shift(1);
        let diff: Float64Chunked = current.f64()? - previous.f64()?;

        let mut diff = diff.into_series();
        diff.rename(alias);
        self.df.with_column(diff)?;
        Ok(())
    }

    /// Drop every row that has a null in any column.
    pub fn drop_nulls(self) -> Result<Self, FrameError> {
        let df = self.df.drop_nulls::<String>(None)?;
        Ok(Self { df })
    }

    /// Dense matrix of the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<FeatureMatrix, FrameError> {
        for name in names {
            self.check_no_nulls(name)?;
        }
        let values = self
            .df
            .select(names)?
            .to_ndarray::<Float64Type>(IndexOrder::C)?;
        Ok(FeatureMatrix {
            columns: names.to_vec(),
            values,
        })
    }

    /// A single column as a dense vector.
    pub fn dense(&self, name: &str) -> Result<Array1<f64>, FrameError> {
        self.require(name)?
            .f64()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.ok_or_else(|| FrameError::NullValue {
                    column: name.to_string(),
                    row,
                })
            })
            .collect()
    }

    fn check_no_nulls(&self, name: &str) -> Result<(), FrameError> {
        let column = self.require(name)?;
        if column.null_count() == 0 {
            return Ok(());
        }
        let row = column
            .f64()?
            .into_iter()
            .position(|v| v.is_none())
            .unwrap_or_default();
        Err(FrameError::NullValue {
            column: name.to_string(),
            row,
        })
    }

    fn require(&self, name: &str) -> Result<&Series, FrameError> {
        if name == TIMESTAMP_COLUMN {
            return Err(FrameError::MissingColumn(name.to_string()));
        }
        self.df
            .column(name)
            .map_err(|_| FrameError::MissingColumn(name.to_string()))
    }
}

/// Dense row-major feature table with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self, FrameError> {
        if columns.len() != values.ncols() {
            return Err(FrameError::LengthMismatch {
                column: "<header>".to_string(),
                expected: values.ncols(),
                found: columns.len(),
            });
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, FrameError> {
        self.column_index(name)
            .map(|j| self.values.column(j))
            .ok_or_else(|| FrameError::MissingColumn(name.to_string()))
    }

    /// Matrix restricted to `names`, in that order.
    pub fn select_columns(&self, names: &[String]) -> Result<FeatureMatrix, FrameError> {
        let indices = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| FrameError::MissingColumn(n.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeatureMatrix {
            columns: names.to_vec(),
            values: self.values.select(Axis(1), &indices),
        })
    }

    /// Matrix restricted to the given rows, in that order.
    pub fn take_rows(&self, rows: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }
}
