//! Raw and cleaned hourly observations.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A single row of the raw rental dataset.
///
/// Only the columns the pipeline consumes are declared; `instant`, `yr`,
/// `mnth`, `weekday`, `casual` and `registered` are ignored when reading since
/// the calendar columns are rebuilt from the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub dteday: NaiveDate,
    pub hr: u32,
    pub season: u8,
    pub holiday: u8,
    pub workingday: u8,
    pub weathersit: u8,
    pub temp: f64,
    pub atemp: f64,
    pub hum: f64,
    pub windspeed: f64,
    pub cnt: u32,
}

impl RawObservation {
    /// Timestamp of the hour this row describes (`dteday + hr`).
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.dteday.and_hms_opt(self.hr, 0, 0)
    }
}

/// A fully observed (or fully imputed) hour on the contiguous timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub season: u8,
    pub holiday: u8,
    pub workingday: u8,
    pub weathersit: u8,
    pub temp: f64,
    pub atemp: f64,
    pub hum: f64,
    pub windspeed: f64,
    pub cnt: u32,
}

impl Observation {
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    pub fn month(&self) -> u32 {
        self.timestamp.month()
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    /// Day of week, Monday = 0.
    pub fn weekday(&self) -> u32 {
        self.timestamp.weekday().num_days_from_monday()
    }
}
