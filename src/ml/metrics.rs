//! Evaluation metrics and grid-search scoring.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::hyperparams::Params;

/// Registered name of [`bike_demand_error`].
pub const BIKE_DEMAND_ERROR: &str = "bike demand error";

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("invalid parameters for metric '{metric}': {source}")]
    InvalidParams {
        metric: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot compute a metric on empty input")]
    EmptyInput,
    #[error("got {found} predictions for {expected} targets")]
    LengthMismatch { expected: usize, found: usize },
}

/// A metric as configured: a registered name plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

/// Relative cost of under- and over-predicting demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BikeDemandErrorParams {
    pub understock_price: f64,
    pub overstock_price: f64,
}

impl Default for BikeDemandErrorParams {
    fn default() -> Self {
        Self {
            understock_price: 0.5,
            overstock_price: 0.5,
        }
    }
}

/// Mean absolute error where each residual `y - ŷ` is weighted by
/// `understock_price` when positive and `overstock_price` when negative.
pub fn bike_demand_error(
    y_true: &[f64],
    y_pred: &[f64],
    params: &BikeDemandErrorParams,
) -> Result<f64, MetricError> {
    check_inputs(y_true, y_pred)?;

    let total: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(&y, &p)| {
            let error = y - p;
            let factor = if error > 0.0 {
                params.understock_price
            } else if error < 0.0 {
                params.overstock_price
            } else {
                0.0
            };
            error.abs() * factor
        })
        .sum();

    Ok(total / y_true.len() as f64)
}

/// Coefficient of determination.
///
/// A constant target scores 1.0 when predicted exactly and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricError> {
    check_inputs(y_true, y_pred)?;

    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|y| (y - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

fn check_inputs(y_true: &[f64], y_pred: &[f64]) -> Result<(), MetricError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricError::LengthMismatch {
            expected: y_true.len(),
            found: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricError::EmptyInput);
    }
    Ok(())
}

/// A resolved metric with typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    BikeDemandError(BikeDemandErrorParams),
}

impl Metric {
    /// Look up a metric by its registered name.
    pub fn from_name(name: &str, params: &Params) -> Result<Self, MetricError> {
        let invalid = |source| MetricError::InvalidParams {
            metric: name.to_string(),
            source,
        };
        match name {
            BIKE_DEMAND_ERROR => {
                let object = Value::Object(params.clone().into_iter().collect());
                let params = serde_json::from_value(object).map_err(invalid)?;
                Ok(Metric::BikeDemandError(params))
            }
            other => Err(MetricError::UnknownMetric(other.to_string())),
        }
    }

    pub fn from_spec(spec: &MetricSpec) -> Result<Self, MetricError> {
        Self::from_name(&spec.name, &spec.params)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::BikeDemandError(_) => BIKE_DEMAND_ERROR,
        }
    }

    /// Metric value; lower is better.
    pub fn compute(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricError> {
        match self {
            Metric::BikeDemandError(params) => bike_demand_error(y_true, y_pred, params),
        }
    }

    /// Score for model selection; greater is better.
    pub fn score(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricError> {
        Ok(-self.compute(y_true, y_pred)?)
    }
}
