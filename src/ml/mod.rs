//! Model building, training and evaluation
//!
//! A [`Pipeline`] selects the model features, one-hot encodes the categorical
//! ones and fits gradient-boosted regression trees on the result. Pipelines
//! are trained directly or through a cross-validated grid search, stored as
//! versioned artifacts and evaluated per split.

pub mod evaluation;
pub mod hyperparams;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod training;

pub use evaluation::{EvaluationError, EvaluationReport, SplitValue, evaluate, save_report};
pub use hyperparams::{HyperparamError, HyperparameterMapping, ParamGrid, flatten, unflatten};
pub use metrics::{Metric, MetricError, MetricSpec};
pub use model::{Pipeline, PipelineError, StageKind};
pub use persistence::{ArtifactError, ArtifactStore};
pub use training::{SearchError, SearchOutcome, SearchSettings, TrainedEstimator, grid_search, train_direct};
