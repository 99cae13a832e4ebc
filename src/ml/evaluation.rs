//! Per-split metric reports for a stored model.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metrics::{Metric, MetricError};
use super::model::{Pipeline, PipelineError};
use crate::data::{Dataset, SplitName};

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("failed to write report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One metric value on one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitValue {
    pub split: SplitName,
    pub value: f64,
}

/// Metric name to its values, one per evaluated split in split order.
pub type EvaluationReport = BTreeMap<String, Vec<SplitValue>>;

/// Convert raw regressor output to rental counts: negative values become
/// zero and fractions are truncated.
pub fn to_counts(predictions: &Array1<f64>) -> Vec<f64> {
    predictions.iter().map(|p| p.max(0.0).trunc()).collect()
}

/// Evaluate every metric on every split of `dataset`.
///
/// A split without rows has no defined metric value and is reported as NaN
/// so the remaining splits are still evaluated.
pub fn evaluate(
    pipeline: &Pipeline,
    dataset: &Dataset,
    metrics: &[Metric],
) -> Result<EvaluationReport, EvaluationError> {
    let mut report = EvaluationReport::new();

    for (split, data) in &dataset.splits {
        if data.is_empty() {
            tracing::warn!(split = %split, "Split has no rows, reporting NaN");
            for metric in metrics {
                report
                    .entry(metric.name().to_string())
                    .or_default()
                    .push(SplitValue {
                        split: *split,
                        value: f64::NAN,
                    });
            }
            continue;
        }

        let predictions = to_counts(&pipeline.predict(&data.features)?);
        let targets = data.target.to_vec();

        for metric in metrics {
            let value = metric.compute(&targets, &predictions)?;
            tracing::info!(metric = metric.name(), split = %split, value, "Evaluated metric");
            report
                .entry(metric.name().to_string())
                .or_default()
                .push(SplitValue {
                    split: *split,
                    value,
                });
        }
    }

    Ok(report)
}

/// Path of the report for `version` under `reports_dir`.
pub fn report_path(reports_dir: &Path, version: &str) -> PathBuf {
    reports_dir.join(format!("{version}.yml"))
}

/// Write `report` as YAML to `<reports_dir>/<version>.yml`, creating the
/// directory if needed.
pub fn save_report(
    report: &EvaluationReport,
    reports_dir: &Path,
    version: &str,
) -> Result<PathBuf, EvaluationError> {
    let path = report_path(reports_dir, version);
    let yaml = serde_yaml::to_string(report)?;

    fs::create_dir_all(reports_dir)
        .and_then(|()| fs::write(&path, yaml))
        .map_err(|source| EvaluationError::Write {
            path: path.clone(),
            source,
        })?;

    tracing::info!(path = %path.display(), "Saved evaluation report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::array;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::data::{LagNames, Split};
    use crate::ml::hyperparams::HyperparameterMapping;
    use crate::ml::model::tests::hourly_training_set;

    fn fitted_pipeline() -> Pipeline {
        let hyperparams: HyperparameterMapping = serde_json::from_value(json!({
            "column_transformer": {"categorical_features": ["hr"]},
            "regressor": {"n_estimators": 20, "max_depth": 3, "learning_rate": 0.3},
        }))
        .unwrap();
        let (x, y) = hourly_training_set(24 * 7);
        let mut pipeline = Pipeline::build(&hyperparams).unwrap();
        pipeline.fit(&x, &y).unwrap();
        pipeline
    }

    fn dataset() -> Dataset {
        let (train_x, train_y) = hourly_training_set(24 * 7);
        let (test_x, test_y) = hourly_training_set(24);
        Dataset {
            splits: vec![
                (
                    SplitName::Train,
                    Split {
                        features: train_x,
                        target: train_y,
                    },
                ),
                (
                    SplitName::Test,
                    Split {
                        features: test_x,
                        target: test_y,
                    },
                ),
            ],
            lags: LagNames::default(),
        }
    }

    #[test]
    fn test_to_counts_clamps_and_truncates() {
        assert_eq!(to_counts(&array![-3.2, 0.0, 4.9, 12.1]), vec![0.0, 0.0, 4.0, 12.0]);
    }

    #[test]
    fn test_report_has_one_entry_per_split() {
        let metrics = [Metric::BikeDemandError(Default::default())];

        let report = evaluate(&fitted_pipeline(), &dataset(), &metrics).unwrap();

        let values = &report["bike demand error"];
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].split, SplitName::Train);
        assert_eq!(values[1].split, SplitName::Test);
        assert!(values.iter().all(|v| v.value >= 0.0));
    }

    #[test]
    fn test_empty_split_is_reported_as_nan() {
        let mut dataset = dataset();
        let test = &mut dataset.splits[1].1;
        test.features = test.features.take_rows(&[]);
        test.target = Array1::zeros(0);
        let metrics = [Metric::BikeDemandError(Default::default())];

        let report = evaluate(&fitted_pipeline(), &dataset, &metrics).unwrap();

        let values = &report["bike demand error"];
        assert_eq!(values.len(), 2);
        assert!(values[0].value.is_finite());
        assert_eq!(values[1].split, SplitName::Test);
        assert!(values[1].value.is_nan());

        let dir = tempdir().unwrap();
        let path = save_report(&report, dir.path(), "v").unwrap();
        let loaded: EvaluationReport =
            serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert!(loaded["bike demand error"][1].value.is_nan());
    }

    #[test]
    fn test_save_report_round_trip() {
        let dir = tempdir().unwrap();
        let reports_dir = dir.path().join("reports");
        let report: EvaluationReport = [(
            "bike demand error".to_string(),
            vec![
                SplitValue {
                    split: SplitName::Train,
                    value: 1.25,
                },
                SplitValue {
                    split: SplitName::Test,
                    value: 2.5,
                },
            ],
        )]
        .into();

        let path = save_report(&report, &reports_dir, "2024-06-17 10 30 00+00 00").unwrap();

        assert_eq!(path, reports_dir.join("2024-06-17 10 30 00+00 00.yml"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("split: train"));
        let loaded: EvaluationReport = serde_yaml::from_str(&text).unwrap();
        assert_relative_eq!(loaded["bike demand error"][1].value, 2.5);
    }
}
