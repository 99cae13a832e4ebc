//! Canonical feature groupings shared by training and hyperparameter search.

use super::expand::LagNames;

/// Base columns the model selects, in order.
pub const MODEL_BASE_FEATURES: [&str; 11] = [
    "season",
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

/// Base columns one-hot encoded by the pipeline.
pub const CATEGORICAL_BASE_FEATURES: [&str; 7] = [
    "season",
    "mnth",
    "hr",
    "holiday",
    "weekday",
    "workingday",
    "weathersit",
];

/// Base columns passed through as numbers.
pub const NUMERICAL_BASE_FEATURES: [&str; 4] = ["temp", "atemp", "hum", "windspeed"];

/// The three feature lists derived from a set of lag names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroups {
    pub model_features: Vec<String>,
    pub categorical_features: Vec<String>,
    pub numerical_features: Vec<String>,
}

/// Build the feature groups. Must be given the lag names produced by the
/// dataset expansion so selected and encoded columns agree.
pub fn aggregate_features(
    count_lags: &[String],
    numeric_lags: &[String],
    categorical_lags: &[String],
) -> FeatureGroups {
    let base = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let model_features = [
        base(&MODEL_BASE_FEATURES),
        count_lags.to_vec(),
        categorical_lags.to_vec(),
        numeric_lags.to_vec(),
    ]
    .concat();

    let categorical_features = [base(&CATEGORICAL_BASE_FEATURES), categorical_lags.to_vec()].concat();

    let numerical_features = [
        base(&NUMERICAL_BASE_FEATURES),
        numeric_lags.to_vec(),
        count_lags.to_vec(),
    ]
    .concat();

    FeatureGroups {
        model_features,
        categorical_features,
        numerical_features,
    }
}

impl From<&LagNames> for FeatureGroups {
    fn from(lags: &LagNames) -> Self {
        aggregate_features(&lags.count, &lags.numeric, &lags.categorical)
    }
}
