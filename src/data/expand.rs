//! Lagged and differenced time-series features.

use super::frame::{FrameError, TimeFrame};

/// Offsets (hours) for the rental count lags.
pub const COUNT_LAG_HOURS: [usize; 4] = [1, 2, 3, 24 * 7];
/// Offsets (hours) for the weather lags.
pub const WEATHER_LAG_HOURS: [usize; 3] = [1, 2, 3];
/// Offsets (hours) for the calendar-flag lags.
pub const CALENDAR_LAG_HOURS: [usize; 1] = [24 * 7];

pub const WEATHER_VARIABLES: [&str; 4] = ["temp", "atemp", "hum", "windspeed"];
pub const CALENDAR_VARIABLES: [&str; 2] = ["holiday", "workingday"];

/// Name of the first difference of the one-hour count lag.
pub const COUNT_DIFF_COLUMN: &str = "cnt_last_hour_diff";

/// Names of the derived columns, grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LagNames {
    /// Count lags, followed by the count difference when present.
    pub count: Vec<String>,
    /// Weather lags.
    pub numeric: Vec<String>,
    /// Calendar-flag lags.
    pub categorical: Vec<String>,
}

/// `<var>_<h>_hours` below a day, `<var>_<d>_days` from a day up.
pub fn lag_column_name(variable: &str, hours: usize) -> String {
    if hours < 24 {
        format!("{variable}_{hours}_hours")
    } else {
        format!("{variable}_{}_days", hours / 24)
    }
}

/// Add one lag column per (variable, offset) pair, variables outermost.
/// Returns the names of the added columns in insertion order.
pub fn add_lagged_columns(
    frame: &mut TimeFrame,
    variables: &[&str],
    offsets: &[usize],
) -> Result<Vec<String>, FrameError> {
    let mut names = Vec::with_capacity(variables.len() * offsets.len());
    for variable in variables {
        for &offset in offsets {
            let name = lag_column_name(variable, offset);
            frame.add_lag(variable, offset, &name)?;
            names.push(name);
        }
    }
    Ok(names)
}

/// Add [`COUNT_DIFF_COLUMN`] when the one-hour count lag exists.
pub fn add_count_difference(
    frame: &mut TimeFrame,
    count_lags: &mut Vec<String>,
) -> Result<(), FrameError> {
    let source = lag_column_name("cnt", 1);
    if !frame.has_column(&source) {
        return Ok(());
    }

    frame.add_difference(&source, COUNT_DIFF_COLUMN)?;
    count_lags.push(COUNT_DIFF_COLUMN.to_string());
    Ok(())
}

/// Derive every lag and difference column, then drop the leading rows whose
/// lag window reaches before the start of the series.
pub fn expand_dataset(mut frame: TimeFrame) -> Result<(TimeFrame, LagNames), FrameError> {
    let mut count = add_lagged_columns(&mut frame, &["cnt"], &COUNT_LAG_HOURS)?;
    let numeric = add_lagged_columns(&mut frame, &WEATHER_VARIABLES, &WEATHER_LAG_HOURS)?;
    let categorical = add_lagged_columns(&mut frame, &CALENDAR_VARIABLES, &CALENDAR_LAG_HOURS)?;
    add_count_difference(&mut frame, &mut count)?;

    let before = frame.len();
    let frame = frame.drop_nulls()?;
    tracing::debug!(
        rows = frame.len(),
        dropped = before - frame.len(),
        "Expanded dataset with lagged features"
    );

    Ok((
        frame,
        LagNames {
            count,
            numeric,
            categorical,
        },
    ))
}
