//! Subcommand implementations shared by the binary and the integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{ConfigCache, PipelineConfig};
use crate::data::{CsvDatasetReader, Dataset, DatasetCache, SplitName, get_dataset};
use crate::ml::evaluation::{evaluate, save_report};
use crate::ml::model::Pipeline;
use crate::ml::persistence::ArtifactStore;
use crate::ml::training::{grid_search, train_direct};
use crate::traits::Clock;

/// Runs pipeline commands with shared read caches and an injected clock.
pub struct Runner {
    configs: ConfigCache,
    datasets: DatasetCache,
    clock: Arc<dyn Clock>,
}

impl Runner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            configs: ConfigCache::new(),
            datasets: DatasetCache::new(),
            clock,
        }
    }

    pub fn config(&self, path: &Path) -> Result<Arc<PipelineConfig>> {
        PipelineConfig::load_cached(path, &self.configs)
    }

    fn dataset(&self, config: &PipelineConfig, splits: &[SplitName]) -> Result<Dataset> {
        let reader = CsvDatasetReader::new(&config.data.filepath, &self.datasets);
        get_dataset(&reader, splits, &config.data.years_train).with_context(|| {
            format!(
                "failed to build dataset from {}",
                config.data.filepath.display()
            )
        })
    }

    /// Train with the configured hyperparameters and save the artifact.
    /// Returns the artifact version.
    pub fn train(&self, config_path: &Path) -> Result<String> {
        let config = self.config(config_path)?;
        let mut dataset = self.dataset(&config, &[SplitName::Train])?;
        let groups = dataset.feature_groups();
        let train = dataset
            .take_split(SplitName::Train)
            .context("dataset has no train split")?;

        tracing::info!(rows = train.len(), features = groups.model_features.len(), "Training model");
        let trained = train_direct(&config.hyperparams, &groups, &train).context("training failed")?;

        let store = ArtifactStore::new(&config.export.output_dir);
        let version = store
            .save(&trained.pipeline, &trained.hyperparams, self.clock.as_ref())
            .context("failed to save model artifact")?;
        Ok(version)
    }

    /// Grid-search the configured parameter grid and save the best
    /// estimator. Returns the artifact version.
    pub fn find_hyperparams(&self, config_path: &Path) -> Result<String> {
        let config = self.config(config_path)?;
        let settings = config.search_settings()?;
        let mut dataset = self.dataset(&config, &[SplitName::Train])?;
        let groups = dataset.feature_groups();
        let train = dataset
            .take_split(SplitName::Train)
            .context("dataset has no train split")?;

        let outcome = grid_search(&config.search.grid, &groups, &train, &settings)
            .context("hyperparameter search failed")?;
        tracing::info!(
            best_score = outcome.best_score,
            best_params = ?outcome.best_params,
            "Grid search finished"
        );

        let store = ArtifactStore::new(&config.export.output_dir);
        let version = store
            .save(&outcome.estimator, &outcome.best_params, self.clock.as_ref())
            .context("failed to save model artifact")?;
        Ok(version)
    }

    /// Evaluate a stored model on `splits` and write the report.
    /// Returns the report path.
    pub fn eval(&self, config_path: &Path, version: &str, splits: &[SplitName]) -> Result<PathBuf> {
        let config = self.config(config_path)?;
        let metrics = config.resolve_metrics()?;

        let store = ArtifactStore::new(&config.export.output_dir);
        let pipeline: Pipeline = store
            .load(version)
            .with_context(|| format!("failed to load model version '{version}'"))?;

        let dataset = self.dataset(&config, splits)?;
        let report = evaluate(&pipeline, &dataset, &metrics).context("evaluation failed")?;

        let path = save_report(&report, &config.reports.dir, version)?;
        Ok(path)
    }
}
