use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::cache::ReadCache;
use crate::ml::hyperparams::{HyperparameterMapping, ParamGrid};
use crate::ml::metrics::{Metric, MetricSpec};
use crate::ml::training::SearchSettings;

/// Memoized pipeline configurations, keyed by file path.
pub type ConfigCache = ReadCache<PipelineConfig>;

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Nested `{stage: {param: value}}` mapping used by `train`.
    #[serde(default)]
    pub hyperparams: HyperparameterMapping,
    pub data: DataConfig,
    pub export: ExportConfig,
    pub search: SearchConfig,
    /// Metrics in report order; the first one scores grid candidates.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    pub reports: ReportsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub filepath: PathBuf,
    /// Years whose rows form the train split.
    pub years_train: Vec<i32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub grid: ParamGrid,
    pub jobs: i64,
    pub folds: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            grid: ParamGrid::new(),
            jobs: 1,
            folds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportsConfig {
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
        }
    }
}

impl PipelineConfig {
    /// Load the YAML file at `path` over the built-in defaults, then apply
    /// `BIKE__SECTION__KEY` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let builder = Config::builder()
            // 1. Defaults
            .set_default("export.output_dir", "models")?
            .set_default("search.jobs", 1)?
            .set_default("search.folds", 5)?
            .set_default("reports.dir", "reports")?
            // 2. Pipeline config file (required)
            .add_source(File::from(path.to_path_buf()).format(FileFormat::Yaml).required(true))
            // 3. Environment variables (BIKE__EXPORT__OUTPUT_DIR=...)
            .add_source(Environment::with_prefix("BIKE").separator("__"));

        let settings = builder
            .build()
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = settings
            .try_deserialize()
            .with_context(|| format!("invalid pipeline config {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// [`load`](Self::load) through `cache`, so each path is read once.
    pub fn load_cached(path: &Path, cache: &ConfigCache) -> Result<Arc<Self>> {
        cache.get_or_try_load(path, Self::load)
    }

    /// Resolve every configured metric.
    pub fn resolve_metrics(&self) -> Result<Vec<Metric>> {
        self.metrics
            .iter()
            .map(|spec| Metric::from_spec(spec).context("invalid metric in config"))
            .collect()
    }

    /// Grid search settings, scored with the first configured metric.
    pub fn search_settings(&self) -> Result<SearchSettings> {
        let Some(spec) = self.metrics.first() else {
            bail!("grid search needs at least one entry under `metrics`");
        };
        Ok(SearchSettings {
            jobs: self.search.jobs,
            folds: self.search.folds,
            scoring: Metric::from_spec(spec).context("invalid scoring metric")?,
        })
    }
}
