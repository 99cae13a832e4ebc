//! Bike Demand Library
//!
//! Hourly bike-rental demand prediction: dataset cleaning and lag-feature
//! expansion, a one-hot + gradient-boosted-tree pipeline, grid search,
//! versioned model artifacts, evaluation reports and an HTTP prediction
//! service.

pub mod cache;
pub mod commands;
pub mod config;
pub mod data;
pub mod ml;
pub mod service;
pub mod traits;

// Re-export commonly used types
pub use cache::ReadCache;
pub use commands::Runner;
pub use config::{ConfigCache, PipelineConfig};
pub use data::{
    Dataset, DatasetCache, DatasetError, FeatureGroups, Split, SplitName, aggregate_features,
    get_dataset,
};
pub use ml::{ArtifactStore, Metric, Pipeline, PipelineError};
pub use service::{ModelInput, PredictionService};
pub use traits::{Clock, MockClock, MockRequestLogger, RequestLogger, SystemClock};
