//! Feature selection, one-hot encoding and gradient-boosted regression,
//! composed into a fixed linear pipeline.

use std::fmt;
use std::str::FromStr;

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec, PredVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::hyperparams::{HyperparameterMapping, Params};
use super::metrics::{MetricError, r2_score};
use crate::data::{FeatureMatrix, FrameError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown pipeline stage '{0}', expected one of selector, column_transformer, regressor")]
    UnknownStage(String),
    #[error("invalid parameters for stage '{stage}': {source}")]
    InvalidParams {
        stage: StageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {reason}")]
    InvalidHyperparameter { name: &'static str, reason: String },
    #[error("pipeline must be fitted before use")]
    NotFitted,
    #[error("cannot fit on an empty training set")]
    EmptyInput,
    #[error("got {targets} targets for {rows} feature rows")]
    TargetLength { rows: usize, targets: usize },
    #[error("input columns {found:?} differ from the fitted columns {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// The closed set of pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Selector,
    ColumnTransformer,
    Regressor,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::Selector,
        StageKind::ColumnTransformer,
        StageKind::Regressor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Selector => "selector",
            StageKind::ColumnTransformer => "column_transformer",
            StageKind::Regressor => "regressor",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

fn parse_params<T: DeserializeOwned>(stage: StageKind, params: &Params) -> Result<T, PipelineError> {
    let object = Value::Object(params.clone().into_iter().collect());
    serde_json::from_value(object).map_err(|source| PipelineError::InvalidParams { stage, source })
}

// ==================== Selector ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectorParams {
    /// Columns to keep, in output order. Empty keeps every column.
    pub feature_columns: Vec<String>,
}

/// Restricts the input to a fixed list of columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelector {
    params: SelectorParams,
}

impl FeatureSelector {
    pub fn new(params: SelectorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SelectorParams {
        &self.params
    }

    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix, PipelineError> {
        if self.params.feature_columns.is_empty() {
            return Ok(x.clone());
        }
        Ok(x.select_columns(&self.params.feature_columns)?)
    }
}

// ==================== Encoder ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderParams {
    /// Columns to one-hot encode; all others pass through unchanged.
    pub categorical_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedEncoding {
    input_columns: Vec<String>,
    /// Sorted distinct values seen during fit, per categorical column.
    categories: Vec<(usize, Vec<f64>)>,
    passthrough: Vec<usize>,
    output_columns: Vec<String>,
}

/// One-hot encodes the categorical columns and appends the remaining
/// columns unchanged. Values not seen during fit encode as all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    params: EncoderParams,
    fitted: Option<FittedEncoding>,
}

impl CategoricalEncoder {
    pub fn new(params: EncoderParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &EncoderParams {
        &self.params
    }

    /// Output column names; available after fit.
    pub fn output_columns(&self) -> Option<&[String]> {
        self.fitted.as_ref().map(|f| f.output_columns.as_slice())
    }

    pub fn fit(&mut self, x: &FeatureMatrix) -> Result<(), PipelineError> {
        let mut categories = Vec::with_capacity(self.params.categorical_features.len());
        let mut output_columns = Vec::new();

        for name in &self.params.categorical_features {
            let index = x
                .column_index(name)
                .ok_or_else(|| FrameError::MissingColumn(name.clone()))?;

            let mut values: Vec<f64> = x.values().column(index).to_vec();
            values.sort_by(f64::total_cmp);
            values.dedup();

            output_columns.extend(values.iter().map(|v| format!("onehot__{name}_{v}")));
            categories.push((index, values));
        }

        let passthrough: Vec<usize> = (0..x.n_cols())
            .filter(|j| !categories.iter().any(|(index, _)| index == j))
            .collect();
        output_columns.extend(
            passthrough
                .iter()
                .map(|&j| format!("remainder__{}", x.columns()[j])),
        );

        tracing::debug!(
            categorical = categories.len(),
            passthrough = passthrough.len(),
            outputs = output_columns.len(),
            "Fitted categorical encoder"
        );

        self.fitted = Some(FittedEncoding {
            input_columns: x.columns().to_vec(),
            categories,
            passthrough,
            output_columns,
        });
        Ok(())
    }

    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix, PipelineError> {
        let fitted = self.fitted.as_ref().ok_or(PipelineError::NotFitted)?;
        if x.columns() != fitted.input_columns.as_slice() {
            return Err(PipelineError::SchemaMismatch {
                expected: fitted.input_columns.clone(),
                found: x.columns().to_vec(),
            });
        }

        let mut out = Array2::zeros((x.n_rows(), fitted.output_columns.len()));
        let mut offset = 0;
        for (index, values) in &fitted.categories {
            for (i, value) in x.values().column(*index).iter().enumerate() {
                if let Ok(k) = values.binary_search_by(|candidate| candidate.total_cmp(value)) {
                    out[[i, offset + k]] = 1.0;
                }
            }
            offset += values.len();
        }
        for (k, &j) in fitted.passthrough.iter().enumerate() {
            out.column_mut(offset + k).assign(&x.values().column(j));
        }

        Ok(FeatureMatrix::new(fitted.output_columns.clone(), out)?)
    }

    pub fn fit_transform(&mut self, x: &FeatureMatrix) -> Result<FeatureMatrix, PipelineError> {
        self.fit(x)?;
        self.transform(x)
    }
}

// ==================== Regressor ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegressorParams {
    /// Number of boosting rounds.
    pub n_estimators: usize,
    pub max_depth: u32,
    pub learning_rate: f64,
    pub min_leaf_size: usize,
    /// Fraction of rows sampled per tree.
    pub subsample: f64,
    /// Fraction of features sampled per tree.
    pub colsample_bytree: f64,
}

impl Default for RegressorParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            min_leaf_size: 1,
            subsample: 1.0,
            colsample_bytree: 1.0,
        }
    }
}

impl RegressorParams {
    fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |name, reason: &str| PipelineError::InvalidHyperparameter {
            name,
            reason: reason.to_string(),
        };
        if self.n_estimators == 0 {
            return Err(invalid("n_estimators", "must be at least 1"));
        }
        if self.max_depth == 0 {
            return Err(invalid("max_depth", "must be at least 1"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(invalid("learning_rate", "must be positive"));
        }
        // gbdt trains in f32
        if !(self.learning_rate as f32).is_finite() {
            return Err(invalid("learning_rate", "must fit in a 32-bit float"));
        }
        if self.min_leaf_size == 0 {
            return Err(invalid("min_leaf_size", "must be at least 1"));
        }
        for (name, ratio) in [
            ("subsample", self.subsample),
            ("colsample_bytree", self.colsample_bytree),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid(name, "must be in (0, 1]"));
            }
        }
        Ok(())
    }

    fn to_config(&self, feature_size: usize) -> Config {
        let mut cfg = Config::new();
        cfg.set_feature_size(feature_size);
        cfg.set_max_depth(self.max_depth);
        cfg.set_iterations(self.n_estimators);
        cfg.set_shrinkage(self.learning_rate as f32);
        cfg.set_loss("SquaredError");
        cfg.set_min_leaf_size(self.min_leaf_size);
        cfg.set_data_sample_ratio(self.subsample);
        cfg.set_feature_sample_ratio(self.colsample_bytree);
        cfg.set_training_optimization_level(2);
        cfg.set_debug(false);
        cfg
    }
}

/// Gradient-boosted regression trees with squared-error loss.
#[derive(Default, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    params: RegressorParams,
    feature_size: usize,
    model: Option<GBDT>,
}

impl fmt::Debug for GradientBoostedRegressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBoostedRegressor")
            .field("params", &self.params)
            .field("feature_size", &self.feature_size)
            .field("fitted", &self.model.is_some())
            .finish()
    }
}

impl GradientBoostedRegressor {
    pub fn new(params: RegressorParams) -> Self {
        Self {
            params,
            feature_size: 0,
            model: None,
        }
    }

    pub fn params(&self) -> &RegressorParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn fit(&mut self, x: &FeatureMatrix, y: &Array1<f64>) -> Result<(), PipelineError> {
        self.params.validate()?;

        let mut data: DataVec = rows(x)
            .zip(y.iter())
            .map(|(features, &target)| Data::new_training_data(features, 1.0, target as f32, None))
            .collect();

        let mut model = GBDT::new(&self.params.to_config(x.n_cols()));
        model.fit(&mut data);

        self.feature_size = x.n_cols();
        self.model = Some(model);
        Ok(())
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Array1<f64>, PipelineError> {
        let model = self.model.as_ref().ok_or(PipelineError::NotFitted)?;
        if x.n_rows() == 0 {
            return Ok(Array1::zeros(0));
        }

        let data: DataVec = rows(x)
            .map(|features| Data::new_test_data(features, None))
            .collect();
        let predictions: PredVec = model.predict(&data);

        Ok(predictions.into_iter().map(f64::from).collect())
    }
}

fn rows(x: &FeatureMatrix) -> impl Iterator<Item = Vec<f32>> + '_ {
    x.values()
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|&v| v as f32).collect())
}

// ==================== Pipeline ====================

/// Selector, encoder and regressor applied in that order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Pipeline {
    selector: FeatureSelector,
    encoder: CategoricalEncoder,
    regressor: GradientBoostedRegressor,
}

impl Pipeline {
    /// Build an unfitted pipeline from a nested hyperparameter mapping.
    ///
    /// Every key must name a known stage; stages absent from the mapping use
    /// their defaults. Stage order is fixed regardless of key order.
    pub fn build(hyperparams: &HyperparameterMapping) -> Result<Self, PipelineError> {
        let mut pipeline = Pipeline::default();
        for (name, params) in hyperparams {
            let stage: StageKind = name.parse()?;
            match stage {
                StageKind::Selector => {
                    pipeline.selector = FeatureSelector::new(parse_params(stage, params)?);
                }
                StageKind::ColumnTransformer => {
                    pipeline.encoder = CategoricalEncoder::new(parse_params(stage, params)?);
                }
                StageKind::Regressor => {
                    let params: RegressorParams = parse_params(stage, params)?;
                    params.validate()?;
                    pipeline.regressor = GradientBoostedRegressor::new(params);
                }
            }
        }
        Ok(pipeline)
    }

    pub fn selector(&self) -> &FeatureSelector {
        &self.selector
    }

    pub fn encoder(&self) -> &CategoricalEncoder {
        &self.encoder
    }

    pub fn regressor(&self) -> &GradientBoostedRegressor {
        &self.regressor
    }

    pub fn is_fitted(&self) -> bool {
        self.regressor.is_fitted()
    }

    pub fn fit(&mut self, x: &FeatureMatrix, y: &Array1<f64>) -> Result<(), PipelineError> {
        if x.n_rows() != y.len() {
            return Err(PipelineError::TargetLength {
                rows: x.n_rows(),
                targets: y.len(),
            });
        }
        if x.n_rows() == 0 {
            return Err(PipelineError::EmptyInput);
        }

        let selected = self.selector.transform(x)?;
        let encoded = self.encoder.fit_transform(&selected)?;
        self.regressor.fit(&encoded, y)?;

        tracing::debug!(
            rows = x.n_rows(),
            features = encoded.n_cols(),
            trees = self.regressor.params.n_estimators,
            "Fitted pipeline"
        );
        Ok(())
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Array1<f64>, PipelineError> {
        if !self.is_fitted() {
            return Err(PipelineError::NotFitted);
        }
        let selected = self.selector.transform(x)?;
        let encoded = self.encoder.transform(&selected)?;
        self.regressor.predict(&encoded)
    }

    /// Coefficient of determination of the predictions on `x`.
    pub fn score(&self, x: &FeatureMatrix, y: &Array1<f64>) -> Result<f64, PipelineError> {
        let predictions = self.predict(x)?;
        Ok(r2_score(&y.to_vec(), &predictions.to_vec())?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use ndarray::array;
    use serde_json::json;

    use super::*;

    fn mapping(value: Value) -> HyperparameterMapping {
        serde_json::from_value(value).unwrap()
    }

    fn matrix(columns: &[&str], values: Array2<f64>) -> FeatureMatrix {
        FeatureMatrix::new(columns.iter().map(|c| c.to_string()).collect(), values).unwrap()
    }

    /// Target depends only on the hour, with a weekend bump.
    pub fn hourly_training_set(n: usize) -> (FeatureMatrix, Array1<f64>) {
        let mut values = Array2::zeros((n, 3));
        let mut target = Array1::zeros(n);
        for i in 0..n {
            let hr = (i % 24) as f64;
            let weekend = ((i / 24) % 7 >= 5) as u8 as f64;
            values[[i, 0]] = hr;
            values[[i, 1]] = weekend;
            values[[i, 2]] = 0.5 + 0.01 * (i % 10) as f64;
            target[i] = if (7.0..=19.0).contains(&hr) { 100.0 } else { 10.0 } + 20.0 * weekend;
        }
        (matrix(&["hr", "weekend", "temp"], values), target)
    }

    #[test]
    fn test_stage_kind_parsing() {
        assert_eq!("selector".parse::<StageKind>().unwrap(), StageKind::Selector);
        assert_eq!(
            "column_transformer".parse::<StageKind>().unwrap(),
            StageKind::ColumnTransformer
        );
        assert!(matches!(
            "scaler".parse::<StageKind>(),
            Err(PipelineError::UnknownStage(name)) if name == "scaler"
        ));
    }

    #[test]
    fn test_build_rejects_unknown_stage() {
        let result = Pipeline::build(&mapping(json!({"scaler": {"with_mean": true}})));
        assert!(matches!(result, Err(PipelineError::UnknownStage(_))));
    }

    #[test]
    fn test_build_rejects_unknown_parameter() {
        let result = Pipeline::build(&mapping(json!({"regressor": {"n_trees": 10}})));
        assert!(matches!(
            result,
            Err(PipelineError::InvalidParams {
                stage: StageKind::Regressor,
                ..
            })
        ));
    }

    #[test]
    fn test_build_rejects_invalid_value() {
        let result = Pipeline::build(&mapping(json!({"regressor": {"subsample": 1.5}})));
        assert!(matches!(
            result,
            Err(PipelineError::InvalidHyperparameter {
                name: "subsample",
                ..
            })
        ));
    }

    #[test]
    fn test_build_rejects_learning_rate_beyond_f32() {
        let result = Pipeline::build(&mapping(json!({"regressor": {"learning_rate": 1e40}})));
        assert!(matches!(
            result,
            Err(PipelineError::InvalidHyperparameter {
                name: "learning_rate",
                ..
            })
        ));

        let mut regressor = GradientBoostedRegressor::new(RegressorParams {
            learning_rate: 1e39,
            ..RegressorParams::default()
        });
        let (x, y) = hourly_training_set(24);
        assert!(regressor.fit(&x, &y).is_err());
        assert!(!regressor.is_fitted());
    }

    #[test]
    fn test_build_applies_stage_params() {
        let pipeline = Pipeline::build(&mapping(json!({
            "regressor": {"max_depth": 3, "learning_rate": 0.2},
            "selector": {"feature_columns": ["hr", "temp"]},
            "column_transformer": {"categorical_features": ["hr"]},
        })))
        .unwrap();

        assert_eq!(pipeline.selector().params().feature_columns, vec!["hr", "temp"]);
        assert_eq!(pipeline.encoder().params().categorical_features, vec!["hr"]);
        assert_eq!(pipeline.regressor().params().max_depth, 3);
        assert_eq!(pipeline.regressor().params().n_estimators, 100);
        assert!(!pipeline.is_fitted());
    }

    #[test]
    fn test_selector_orders_and_filters_columns() {
        let x = matrix(&["a", "b", "c"], array![[1.0, 2.0, 3.0]]);
        let selector = FeatureSelector::new(SelectorParams {
            feature_columns: vec!["c".to_string(), "a".to_string()],
        });

        let out = selector.transform(&x).unwrap();
        assert_eq!(out.columns(), ["c", "a"]);
        assert_eq!(out.values(), &array![[3.0, 1.0]]);

        let missing = FeatureSelector::new(SelectorParams {
            feature_columns: vec!["z".to_string()],
        });
        assert!(matches!(
            missing.transform(&x),
            Err(PipelineError::Frame(FrameError::MissingColumn(_)))
        ));
    }

    #[test]
    fn test_encoder_one_hot_and_passthrough() {
        let x = matrix(
            &["season", "temp"],
            array![[2.0, 0.3], [1.0, 0.4], [2.0, 0.5]],
        );
        let mut encoder = CategoricalEncoder::new(EncoderParams {
            categorical_features: vec!["season".to_string()],
        });

        let out = encoder.fit_transform(&x).unwrap();

        assert_eq!(
            out.columns(),
            ["onehot__season_1", "onehot__season_2", "remainder__temp"]
        );
        assert_eq!(
            out.values(),
            &array![[0.0, 1.0, 0.3], [1.0, 0.0, 0.4], [0.0, 1.0, 0.5]]
        );
    }

    #[test]
    fn test_encoder_unseen_category_is_all_zero() {
        let train = matrix(&["season", "temp"], array![[1.0, 0.3], [2.0, 0.4]]);
        let mut encoder = CategoricalEncoder::new(EncoderParams {
            categorical_features: vec!["season".to_string()],
        });
        encoder.fit(&train).unwrap();

        let unseen = matrix(&["season", "temp"], array![[4.0, 0.9]]);
        let out = encoder.transform(&unseen).unwrap();

        assert_eq!(out.values(), &array![[0.0, 0.0, 0.9]]);
    }

    #[test]
    fn test_encoder_requires_fit_and_matching_schema() {
        let x = matrix(&["season"], array![[1.0]]);
        let mut encoder = CategoricalEncoder::default();
        assert!(matches!(encoder.transform(&x), Err(PipelineError::NotFitted)));

        encoder.fit(&x).unwrap();
        let other = matrix(&["hr"], array![[1.0]]);
        assert!(matches!(
            encoder.transform(&other),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_pipeline_fit_predict_score() {
        let (x, y) = hourly_training_set(24 * 14);
        let mut pipeline = Pipeline::build(&mapping(json!({
            "selector": {"feature_columns": ["hr", "weekend", "temp"]},
            "column_transformer": {"categorical_features": ["hr", "weekend"]},
            "regressor": {"n_estimators": 30, "max_depth": 4, "learning_rate": 0.3},
        })))
        .unwrap();

        pipeline.fit(&x, &y).unwrap();
        let predictions = pipeline.predict(&x).unwrap();

        assert_eq!(predictions.len(), y.len());
        assert!(pipeline.score(&x, &y).unwrap() > 0.9);
    }

    #[test]
    fn test_pipeline_predict_before_fit() {
        let (x, _) = hourly_training_set(10);
        let pipeline = Pipeline::default();
        assert!(matches!(pipeline.predict(&x), Err(PipelineError::NotFitted)));
    }

    #[test]
    fn test_pipeline_fit_rejects_bad_shapes() {
        let (x, y) = hourly_training_set(10);
        let mut pipeline = Pipeline::default();

        let short = y.slice(ndarray::s![..5]).to_owned();
        assert!(matches!(
            pipeline.fit(&x, &short),
            Err(PipelineError::TargetLength { rows: 10, targets: 5 })
        ));

        let empty = x.take_rows(&[]);
        assert!(matches!(
            pipeline.fit(&empty, &Array1::zeros(0)),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn test_fitted_pipeline_survives_bincode() {
        let (x, y) = hourly_training_set(24 * 7);
        let mut pipeline = Pipeline::build(&mapping(json!({
            "regressor": {"n_estimators": 10, "max_depth": 3},
        })))
        .unwrap();
        pipeline.fit(&x, &y).unwrap();

        let bytes = bincode::serialize(&pipeline).unwrap();
        let restored: Pipeline = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored.predict(&x).unwrap(), pipeline.predict(&x).unwrap());
    }
}
