//! Timeline reindexing and gap imputation
//!
//! The raw table is placed on a contiguous hourly timeline. Hours missing
//! from the source become gap slots which are filled from nearby rows:
//! 1. Weather, count and working-day fields are copied from the previous hour
//!    when it is on the same weekday, otherwise from the next hour; if that
//!    row is itself incomplete, from the same hour one day earlier.
//! 2. Season and holiday are copied from the first complete row of the same
//!    calendar day.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

use super::DatasetError;
use super::record::{Observation, RawObservation};

/// Hours back to the fallback row of pass 1.
const FALLBACK_OFFSET_HOURS: usize = 24;

/// Errors raised while filling gaps. All of them mean the input violates the
/// data-quality preconditions and are fatal for the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImputeError {
    #[error("no neighbouring row to fill gap at {timestamp}")]
    NoSimilarRow { timestamp: NaiveDateTime },
    #[error("no fully observed row on {date} to copy season/holiday from")]
    NoSameDayReference { date: NaiveDate },
    #[error("gap at {timestamp} still has missing field {field} after imputation")]
    Unfilled {
        timestamp: NaiveDateTime,
        field: &'static str,
    },
}

/// One hour of the reindexed timeline; gap slots start with every field empty.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlySlot {
    pub timestamp: NaiveDateTime,
    pub season: Option<u8>,
    pub holiday: Option<u8>,
    pub workingday: Option<u8>,
    pub weathersit: Option<u8>,
    pub temp: Option<f64>,
    pub atemp: Option<f64>,
    pub hum: Option<f64>,
    pub windspeed: Option<f64>,
    pub cnt: Option<u32>,
}

impl HourlySlot {
    /// An hour absent from the source data.
    pub fn gap(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            season: None,
            holiday: None,
            workingday: None,
            weathersit: None,
            temp: None,
            atemp: None,
            hum: None,
            windspeed: None,
            cnt: None,
        }
    }

    pub fn observed(timestamp: NaiveDateTime, raw: &RawObservation) -> Self {
        Self {
            timestamp,
            season: Some(raw.season),
            holiday: Some(raw.holiday),
            workingday: Some(raw.workingday),
            weathersit: Some(raw.weathersit),
            temp: Some(raw.temp),
            atemp: Some(raw.atemp),
            hum: Some(raw.hum),
            windspeed: Some(raw.windspeed),
            cnt: Some(raw.cnt),
        }
    }

    /// Whether any field is still empty.
    pub fn has_missing(&self) -> bool {
        self.first_missing().is_some()
    }

    fn first_missing(&self) -> Option<&'static str> {
        [
            ("season", self.season.is_none()),
            ("holiday", self.holiday.is_none()),
            ("workingday", self.workingday.is_none()),
            ("weathersit", self.weathersit.is_none()),
            ("temp", self.temp.is_none()),
            ("atemp", self.atemp.is_none()),
            ("hum", self.hum.is_none()),
            ("windspeed", self.windspeed.is_none()),
            ("cnt", self.cnt.is_none()),
        ]
        .into_iter()
        .find_map(|(name, missing)| missing.then_some(name))
    }

    fn copy_similar_fields(&mut self, from: &HourlySlot) {
        self.season = from.season;
        self.workingday = from.workingday;
        self.weathersit = from.weathersit;
        self.temp = from.temp;
        self.atemp = from.atemp;
        self.hum = from.hum;
        self.windspeed = from.windspeed;
        self.cnt = from.cnt;
    }

    fn copy_calendar_fields(&mut self, from: &HourlySlot) {
        self.season = from.season;
        self.holiday = from.holiday;
    }

    fn into_observation(self) -> Result<Observation, ImputeError> {
        let unfilled = |field| ImputeError::Unfilled {
            timestamp: self.timestamp,
            field,
        };
        Ok(Observation {
            timestamp: self.timestamp,
            season: self.season.ok_or_else(|| unfilled("season"))?,
            holiday: self.holiday.ok_or_else(|| unfilled("holiday"))?,
            workingday: self.workingday.ok_or_else(|| unfilled("workingday"))?,
            weathersit: self.weathersit.ok_or_else(|| unfilled("weathersit"))?,
            temp: self.temp.ok_or_else(|| unfilled("temp"))?,
            atemp: self.atemp.ok_or_else(|| unfilled("atemp"))?,
            hum: self.hum.ok_or_else(|| unfilled("hum"))?,
            windspeed: self.windspeed.ok_or_else(|| unfilled("windspeed"))?,
            cnt: self.cnt.ok_or_else(|| unfilled("cnt"))?,
        })
    }
}

/// Place raw rows on a contiguous hourly timeline from the earliest to the
/// latest timestamp. Hours not present in `raw` become gap slots.
pub fn reindex_hourly(raw: &[RawObservation]) -> Result<Vec<HourlySlot>, DatasetError> {
    let mut by_time: HashMap<NaiveDateTime, &RawObservation> = HashMap::with_capacity(raw.len());
    for row in raw {
        let timestamp = row.timestamp().ok_or(DatasetError::InvalidHour {
            date: row.dteday,
            hour: row.hr,
        })?;
        if by_time.insert(timestamp, row).is_some() {
            return Err(DatasetError::DuplicateTimestamp(timestamp));
        }
    }

    let (Some(start), Some(end)) = (by_time.keys().min().copied(), by_time.keys().max().copied())
    else {
        return Err(DatasetError::Empty);
    };

    let hours = (end - start).num_hours();
    let slots: Vec<HourlySlot> = (0..=hours)
        .map(|h| {
            let timestamp = start + Duration::hours(h);
            match by_time.get(&timestamp) {
                Some(row) => HourlySlot::observed(timestamp, row),
                None => HourlySlot::gap(timestamp),
            }
        })
        .collect();

    tracing::debug!(
        observed = raw.len(),
        gaps = slots.len() - raw.len(),
        "Reindexed dataset onto hourly timeline"
    );
    Ok(slots)
}

/// Fill every gap slot, returning a new fully observed series.
///
/// Slots that are already complete are returned unchanged, so imputing a
/// series without gaps is a no-op.
pub fn impute(slots: &[HourlySlot]) -> Result<Vec<Observation>, ImputeError> {
    let mut filled = slots.to_vec();
    let incomplete: Vec<usize> = filled
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.has_missing().then_some(i))
        .collect();

    for &i in &incomplete {
        let source = similar_row(&filled, i)?.clone();
        filled[i].copy_similar_fields(&source);
    }

    for &i in &incomplete {
        let date = filled[i].timestamp.date();
        let reference = filled
            .iter()
            .find(|s| !s.has_missing() && same_calendar_day(s.timestamp.date(), date))
            .cloned()
            .ok_or(ImputeError::NoSameDayReference { date })?;
        filled[i].copy_calendar_fields(&reference);
    }

    if !incomplete.is_empty() {
        tracing::info!(gaps = incomplete.len(), "Imputed missing hours");
    }

    filled.into_iter().map(HourlySlot::into_observation).collect()
}

/// Reindex then impute.
pub fn clean_dataset(raw: &[RawObservation]) -> Result<Vec<Observation>, DatasetError> {
    let slots = reindex_hourly(raw)?;
    Ok(impute(&slots)?)
}

fn similar_row(slots: &[HourlySlot], i: usize) -> Result<&HourlySlot, ImputeError> {
    let timestamp = slots[i].timestamp;
    let missing = || ImputeError::NoSimilarRow { timestamp };

    let previous = i.checked_sub(1).map(|p| &slots[p]);
    let candidate = match previous {
        Some(prev) if prev.timestamp.weekday() == timestamp.weekday() => prev,
        _ => slots.get(i + 1).ok_or_else(missing)?,
    };

    if !candidate.has_missing() {
        return Ok(candidate);
    }

    i.checked_sub(FALLBACK_OFFSET_HOURS)
        .map(|d| &slots[d])
        .ok_or_else(missing)
}

fn same_calendar_day(a: NaiveDate, b: NaiveDate) -> bool {
    a.day() == b.day() && a.month() == b.month() && a.year() == b.year()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_at(start: NaiveDateTime, hour_offset: i64, cnt: u32) -> RawObservation {
        let ts = start + Duration::hours(hour_offset);
        RawObservation {
            dteday: ts.date(),
            hr: chrono::Timelike::hour(&ts),
            season: 1,
            holiday: 0,
            workingday: 1,
            weathersit: 1 + (hour_offset % 3) as u8,
            temp: 0.2 + hour_offset as f64 * 0.01,
            atemp: 0.25,
            hum: 0.5,
            windspeed: 0.1,
            cnt,
        }
    }

    fn monday_morning() -> NaiveDateTime {
        // 2011-01-03 was a Monday
        NaiveDate::from_ymd_opt(2011, 1, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_clean_series_is_unchanged() {
        let start = monday_morning();
        let raw: Vec<RawObservation> = (0..10).map(|h| raw_at(start, h, 10 + h as u32)).collect();

        let cleaned = clean_dataset(&raw).unwrap();

        assert_eq!(cleaned.len(), 10);
        for (obs, row) in cleaned.iter().zip(&raw) {
            assert_eq!(Some(obs.timestamp), row.timestamp());
            assert_eq!(obs.cnt, row.cnt);
            assert_eq!(obs.temp, row.temp);
            assert_eq!(obs.weathersit, row.weathersit);
        }
    }

    #[test]
    fn test_reindex_sorts_and_inserts_gaps() {
        let start = monday_morning();
        let raw = vec![raw_at(start, 3, 3), raw_at(start, 0, 0)];

        let slots = reindex_hourly(&raw).unwrap();

        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].cnt, Some(0));
        assert!(slots[1].has_missing());
        assert!(slots[2].has_missing());
        assert_eq!(slots[3].cnt, Some(3));
    }

    #[test]
    fn test_reindex_rejects_duplicates() {
        let start = monday_morning();
        let raw = vec![raw_at(start, 0, 1), raw_at(start, 0, 2)];

        let result = reindex_hourly(&raw);
        assert!(matches!(result, Err(DatasetError::DuplicateTimestamp(_))));
    }

    #[test]
    fn test_reindex_rejects_empty_input() {
        assert!(matches!(reindex_hourly(&[]), Err(DatasetError::Empty)));
    }

    #[test]
    fn test_gap_copies_previous_hour_on_same_weekday() {
        let start = monday_morning();
        let mut raw: Vec<RawObservation> = (0..6).map(|h| raw_at(start, h, 100 + h as u32)).collect();
        let previous = raw[2].clone();
        raw.remove(3);

        let cleaned = clean_dataset(&raw).unwrap();
        let gap = &cleaned[3];

        assert_eq!(cleaned.len(), 6);
        assert_eq!(gap.timestamp, start + Duration::hours(3));
        assert_eq!(gap.cnt, previous.cnt);
        assert_eq!(gap.season, previous.season);
        assert_eq!(gap.workingday, previous.workingday);
        assert_eq!(gap.weathersit, previous.weathersit);
        assert_eq!(gap.temp, previous.temp);
        assert_eq!(gap.atemp, previous.atemp);
        assert_eq!(gap.hum, previous.hum);
        assert_eq!(gap.windspeed, previous.windspeed);
        assert_eq!(gap.holiday, previous.holiday);
    }

    #[test]
    fn test_gap_at_midnight_copies_next_hour() {
        // Sunday 22:00 .. Monday 02:00, Monday 00:00 missing
        let start = monday_morning() - Duration::hours(2);
        let mut raw: Vec<RawObservation> = (0..5).map(|h| raw_at(start, h, 50 + h as u32)).collect();
        let next = raw[3].clone();
        raw.remove(2);

        let cleaned = clean_dataset(&raw).unwrap();

        assert_eq!(cleaned[2].timestamp, monday_morning());
        assert_eq!(cleaned[2].cnt, next.cnt);
        assert_eq!(cleaned[2].temp, next.temp);
    }

    #[test]
    fn test_consecutive_gaps_fall_back_to_previous_day() {
        let start = monday_morning() - Duration::hours(24);
        let mut raw: Vec<RawObservation> = (0..30).map(|h| raw_at(start, h, h as u32)).collect();
        // Remove Monday 03:00 and 04:00; 04:00's previous hour is itself a gap.
        raw.remove(28);
        raw.remove(27);

        let cleaned = clean_dataset(&raw).unwrap();

        // 03:00 copies 02:00 on the same day
        assert_eq!(cleaned[27].cnt, 26);
        // 04:00 sees an incomplete 03:00 and copies Sunday 04:00
        assert_eq!(cleaned[28].cnt, 4);
    }

    #[test]
    fn test_gap_without_fallback_row_is_fatal() {
        let start = monday_morning();
        let mut raw: Vec<RawObservation> = (0..6).map(|h| raw_at(start, h, h as u32)).collect();
        raw.remove(3);
        raw.remove(2);

        let result = clean_dataset(&raw);

        assert!(matches!(
            result,
            Err(DatasetError::Impute(ImputeError::NoSimilarRow { .. }))
        ));
    }

    #[test]
    fn test_season_and_holiday_come_from_same_calendar_day() {
        let start = monday_morning();
        let mut raw: Vec<RawObservation> = (0..5).map(|h| raw_at(start, h, h as u32)).collect();
        for row in &mut raw {
            row.holiday = 1;
            row.season = 4;
        }
        raw.remove(2);

        let cleaned = clean_dataset(&raw).unwrap();

        assert_eq!(cleaned[2].holiday, 1);
        assert_eq!(cleaned[2].season, 4);
    }

    #[test]
    fn test_calendar_fields_come_from_earliest_complete_row_of_day() {
        let start = monday_morning();
        let mut raw: Vec<RawObservation> = (0..6).map(|h| raw_at(start, h, h as u32)).collect();
        raw[0].season = 2;
        raw[0].holiday = 1;
        for row in &mut raw[1..] {
            row.season = 3;
            row.holiday = 0;
        }
        raw.remove(4);

        let cleaned = clean_dataset(&raw).unwrap();

        // similar-row fields still come from 03:00
        assert_eq!(cleaned[4].cnt, 3);
        assert_eq!(cleaned[4].season, 2);
        assert_eq!(cleaned[4].holiday, 1);
        assert_eq!(cleaned[3].season, 3);
    }

    #[test]
    fn test_calendar_reference_skips_earlier_gaps_of_the_day() {
        // Saturday 20:00 .. Monday 05:00, Monday 00:00 and 01:00 missing
        let start = monday_morning() - Duration::hours(28);
        let mut raw: Vec<RawObservation> = (0..34).map(|h| raw_at(start, h, h as u32)).collect();
        raw[30].season = 4;
        raw[30].holiday = 1;
        for row in &mut raw[31..] {
            row.season = 2;
            row.holiday = 0;
        }
        raw.remove(29);
        raw.remove(28);

        let cleaned = clean_dataset(&raw).unwrap();

        assert_eq!(cleaned.len(), 34);
        for gap in &cleaned[28..30] {
            assert_eq!(gap.season, 4);
            assert_eq!(gap.holiday, 1);
        }
        // 00:00 sees an incomplete 01:00 and falls back to Sunday 00:00
        assert_eq!(cleaned[28].cnt, 4);
        assert_eq!(cleaned[30].season, 4);
        assert_eq!(cleaned[31].season, 2);
    }

    #[test]
    fn test_missing_same_day_reference_is_fatal() {
        let start = monday_morning();
        let mut slots: Vec<HourlySlot> = (0..26)
            .map(|h| {
                let row = raw_at(start, h, h as u32);
                HourlySlot::observed(row.timestamp().unwrap(), &row)
            })
            .collect();
        // Every Tuesday hour is incomplete, so there is no reference row for it.
        for slot in &mut slots[24..] {
            slot.holiday = None;
        }

        let result = impute(&slots);

        assert!(matches!(result, Err(ImputeError::NoSameDayReference { .. })));
    }

    // ==================== Property-Based Tests ====================

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        fn to_raw(obs: &Observation) -> RawObservation {
            RawObservation {
                dteday: obs.timestamp.date(),
                hr: obs.hour(),
                season: obs.season,
                holiday: obs.holiday,
                workingday: obs.workingday,
                weathersit: obs.weathersit,
                temp: obs.temp,
                atemp: obs.atemp,
                hum: obs.hum,
                windspeed: obs.windspeed,
                cnt: obs.cnt,
            }
        }

        proptest! {
            #[test]
            fn cleaning_is_idempotent(
                len in 30usize..80,
                gaps in prop::collection::btree_set(25usize..79, 0..4),
                counts in prop::collection::vec(0u32..500, 80),
            ) {
                let start = monday_morning();
                let raw: Vec<RawObservation> = (0..len)
                    .filter(|i| *i + 1 < len && !gaps.contains(i) || *i + 1 == len)
                    .map(|i| raw_at(start, i as i64, counts[i]))
                    .collect();

                let once = clean_dataset(&raw).unwrap();
                let again = clean_dataset(&once.iter().map(to_raw).collect::<Vec<_>>()).unwrap();

                prop_assert_eq!(once.len(), len);
                prop_assert_eq!(again, once);
            }
        }
    }
}
