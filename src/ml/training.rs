//! Direct training and cross-validated grid search

use ndarray::Array1;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use thiserror::Error;

use super::hyperparams::{
    FlatParams, HyperparamError, HyperparameterMapping, ParamGrid, Params, expand_grid, flatten,
    merge, unflatten,
};
use super::metrics::{Metric, MetricError};
use super::model::{Pipeline, PipelineError, StageKind};
use crate::data::{FeatureGroups, Split};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Hyperparams(#[from] HyperparamError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error("cannot run {folds}-fold cross-validation on {rows} rows")]
    InvalidFolds { folds: usize, rows: usize },
    #[error("failed to start search worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("all {candidates} grid candidates failed")]
    AllCandidatesFailed { candidates: usize },
}

/// A fitted pipeline together with the hyperparameters recorded for it.
#[derive(Debug)]
pub struct TrainedEstimator {
    pub pipeline: Pipeline,
    pub hyperparams: HyperparameterMapping,
}

/// Set the selector and encoder parameters from the feature groups,
/// replacing whatever those stages held before.
pub fn inject_feature_params(hyperparams: &mut HyperparameterMapping, groups: &FeatureGroups) {
    let selector: Params = [(
        "feature_columns".to_string(),
        serde_json::Value::from(groups.model_features.clone()),
    )]
    .into();
    let encoder: Params = [(
        "categorical_features".to_string(),
        serde_json::Value::from(groups.categorical_features.clone()),
    )]
    .into();

    hyperparams.insert(StageKind::Selector.to_string(), selector);
    hyperparams.insert(StageKind::ColumnTransformer.to_string(), encoder);
}

/// Fit a single pipeline on the training split.
///
/// The returned hyperparameters include the injected feature parameters.
pub fn train_direct(
    hyperparams: &HyperparameterMapping,
    groups: &FeatureGroups,
    train: &Split,
) -> Result<TrainedEstimator, PipelineError> {
    let mut hyperparams = hyperparams.clone();
    inject_feature_params(&mut hyperparams, groups);

    let mut pipeline = Pipeline::build(&hyperparams)?;
    pipeline.fit(&train.features, &train.target)?;

    tracing::info!(rows = train.len(), "Trained pipeline");
    Ok(TrainedEstimator {
        pipeline,
        hyperparams,
    })
}

/// Grid search settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Worker threads; zero or negative uses one per CPU.
    pub jobs: i64,
    pub folds: usize,
    pub scoring: Metric,
}

/// Cross-validation result of one grid candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub params: FlatParams,
    /// Mean fold score, `None` if the candidate failed.
    pub mean_score: Option<f64>,
}

#[derive(Debug)]
pub struct SearchOutcome {
    /// Best configuration refit on the whole training split.
    pub estimator: Pipeline,
    /// Grid parameters of the best candidate, nested.
    pub best_params: HyperparameterMapping,
    pub best_score: f64,
    pub candidates: Vec<CandidateScore>,
}

/// Unshuffled K-fold split: contiguous test blocks, the first `n % k`
/// of them one row longer.
pub fn kfold_indices(n: usize, k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>, SearchError> {
    if k < 2 || k > n {
        return Err(SearchError::InvalidFolds { folds: k, rows: n });
    }

    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = n / k + usize::from(fold < n % k);
        let end = start + size;
        let test: Vec<usize> = (start..end).collect();
        let train: Vec<usize> = (0..start).chain(end..n).collect();
        folds.push((train, test));
        start = end;
    }
    Ok(folds)
}

fn evaluate_candidate(
    base: &HyperparameterMapping,
    candidate: &FlatParams,
    split: &Split,
    folds: &[(Vec<usize>, Vec<usize>)],
    scoring: &Metric,
) -> Result<f64, SearchError> {
    let hyperparams = merge(base, &unflatten(candidate)?);

    let mut total = 0.0;
    for (train_rows, test_rows) in folds {
        let mut pipeline = Pipeline::build(&hyperparams)?;
        pipeline.fit(
            &split.features.take_rows(train_rows),
            &Array1::from(take(&split.target, train_rows)),
        )?;

        let predictions = pipeline.predict(&split.features.take_rows(test_rows))?;
        total += scoring.score(&take(&split.target, test_rows), &predictions.to_vec())?;
    }
    Ok(total / folds.len() as f64)
}

fn take(values: &Array1<f64>, rows: &[usize]) -> Vec<f64> {
    rows.iter().map(|&i| values[i]).collect()
}

/// Exhaustive cross-validated search over `grid`.
///
/// Stages named in the grid start from their defaults, with the selector and
/// encoder parameters injected from `groups`. Ties keep the earlier
/// candidate.
pub fn grid_search(
    grid: &ParamGrid,
    groups: &FeatureGroups,
    train: &Split,
    settings: &SearchSettings,
) -> Result<SearchOutcome, SearchError> {
    let flat_grid = flatten(grid);
    let candidates = expand_grid(&flat_grid)?;
    let folds = kfold_indices(train.len(), settings.folds)?;

    let mut base: HyperparameterMapping = grid
        .keys()
        .map(|stage| (stage.clone(), Params::new()))
        .collect();
    inject_feature_params(&mut base, groups);
    Pipeline::build(&base)?;

    let threads = usize::try_from(settings.jobs).unwrap_or(0);
    let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;

    tracing::info!(
        candidates = candidates.len(),
        folds = folds.len(),
        threads = pool.current_num_threads(),
        scoring = settings.scoring.name(),
        "Starting grid search"
    );

    let scores: Vec<Option<f64>> = pool.install(|| {
        candidates
            .par_iter()
            .enumerate()
            .map(|(i, candidate)| {
                match evaluate_candidate(&base, candidate, train, &folds, &settings.scoring) {
                    Ok(score) => {
                        tracing::info!(candidate = i, ?candidate, score, "Scored grid candidate");
                        Some(score).filter(|s| !s.is_nan())
                    }
                    Err(e) => {
                        tracing::warn!(candidate = i, ?candidate, error = %e, "Grid candidate failed");
                        None
                    }
                }
            })
            .collect()
    });

    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.iter().enumerate() {
        if let Some(score) = *score
            && best.is_none_or(|(_, top)| score > top)
        {
            best = Some((i, score));
        }
    }
    let (best_index, best_score) = best.ok_or(SearchError::AllCandidatesFailed {
        candidates: candidates.len(),
    })?;

    let best_params = unflatten(&candidates[best_index])?;
    tracing::info!(?best_params, best_score, "Refitting best grid candidate");

    let mut estimator = Pipeline::build(&merge(&base, &best_params))?;
    estimator.fit(&train.features, &train.target)?;

    let candidates = candidates
        .into_iter()
        .zip(scores)
        .map(|(params, mean_score)| CandidateScore { params, mean_score })
        .collect();

    Ok(SearchOutcome {
        estimator,
        best_params,
        best_score,
        candidates,
    })
}
