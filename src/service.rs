//! HTTP prediction service
//!
//! Accepts rows of the model's feature schema and returns one predicted
//! rental count per row, in input order. Every row is logged with the time
//! it was received before it reaches the model.

use std::path::Path;
use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::FeatureMatrix;
use crate::ml::model::{Pipeline, PipelineError};
use crate::ml::persistence::{ArtifactError, load_model};
use crate::traits::{Clock, RequestLogger, SystemClock, TracingRequestLogger};

/// Feature columns of [`ModelInput`], in the order the dataset produces them.
pub const MODEL_INPUT_COLUMNS: [&str; 31] = [
    "season",
    "yr",
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
    "cnt_1_hours",
    "cnt_2_hours",
    "cnt_3_hours",
    "cnt_7_days",
    "cnt_last_hour_diff",
    "holiday_7_days",
    "workingday_7_days",
    "temp_1_hours",
    "temp_2_hours",
    "temp_3_hours",
    "atemp_1_hours",
    "atemp_2_hours",
    "atemp_3_hours",
    "hum_1_hours",
    "hum_2_hours",
    "hum_3_hours",
    "windspeed_1_hours",
    "windspeed_2_hours",
    "windspeed_3_hours",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: i64 },
}

/// One row of features for a single hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelInput {
    pub season: i64,
    pub yr: i64,
    pub mnth: i64,
    pub hr: i64,
    pub holiday: i64,
    pub weekday: i64,
    pub workingday: i64,
    pub weathersit: i64,
    pub temp: f64,
    pub atemp: f64,
    pub hum: f64,
    pub windspeed: f64,
    pub cnt_1_hours: i64,
    pub cnt_2_hours: i64,
    pub cnt_3_hours: i64,
    pub cnt_7_days: i64,
    pub cnt_last_hour_diff: i64,
    pub holiday_7_days: i64,
    pub workingday_7_days: i64,
    pub temp_1_hours: f64,
    pub temp_2_hours: f64,
    pub temp_3_hours: f64,
    pub atemp_1_hours: f64,
    pub atemp_2_hours: f64,
    pub atemp_3_hours: f64,
    pub hum_1_hours: f64,
    pub hum_2_hours: f64,
    pub hum_3_hours: f64,
    pub windspeed_1_hours: f64,
    pub windspeed_2_hours: f64,
    pub windspeed_3_hours: f64,
}

impl ModelInput {
    /// Check the bounded integer domains.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ranges = [
            ("season", self.season, 1, 4),
            ("yr", self.yr, 1800, 2020),
            ("mnth", self.mnth, 1, 12),
            ("hr", self.hr, 0, 23),
            ("holiday", self.holiday, 0, 1),
            ("weekday", self.weekday, 0, 6),
            ("workingday", self.workingday, 0, 1),
            ("weathersit", self.weathersit, 1, 4),
            ("holiday_7_days", self.holiday_7_days, 0, 1),
            ("workingday_7_days", self.workingday_7_days, 0, 1),
        ];
        for (field, value, min, max) in ranges {
            if !(min..=max).contains(&value) {
                return Err(ValidationError::OutOfRange {
                    field,
                    value,
                    min,
                    max,
                });
            }
        }

        let counts = [
            ("cnt_1_hours", self.cnt_1_hours),
            ("cnt_2_hours", self.cnt_2_hours),
            ("cnt_3_hours", self.cnt_3_hours),
            ("cnt_7_days", self.cnt_7_days),
        ];
        for (field, value) in counts {
            if value < 0 {
                return Err(ValidationError::Negative { field, value });
            }
        }
        Ok(())
    }

    /// Feature values in [`MODEL_INPUT_COLUMNS`] order.
    pub fn values(&self) -> [f64; 31] {
        [
            self.season as f64,
            self.yr as f64,
            self.mnth as f64,
            self.hr as f64,
            self.holiday as f64,
            self.weekday as f64,
            self.workingday as f64,
            self.weathersit as f64,
            self.temp,
            self.atemp,
            self.hum,
            self.windspeed,
            self.cnt_1_hours as f64,
            self.cnt_2_hours as f64,
            self.cnt_3_hours as f64,
            self.cnt_7_days as f64,
            self.cnt_last_hour_diff as f64,
            self.holiday_7_days as f64,
            self.workingday_7_days as f64,
            self.temp_1_hours,
            self.temp_2_hours,
            self.temp_3_hours,
            self.atemp_1_hours,
            self.atemp_2_hours,
            self.atemp_3_hours,
            self.hum_1_hours,
            self.hum_2_hours,
            self.hum_3_hours,
            self.windspeed_1_hours,
            self.windspeed_2_hours,
            self.windspeed_3_hours,
        ]
    }
}

/// Stack rows into a feature matrix with [`MODEL_INPUT_COLUMNS`] columns.
pub fn to_feature_matrix(inputs: &[ModelInput]) -> Result<FeatureMatrix, PipelineError> {
    let mut values = Array2::zeros((inputs.len(), MODEL_INPUT_COLUMNS.len()));
    for (mut row, input) in values.rows_mut().into_iter().zip(inputs) {
        for (cell, value) in row.iter_mut().zip(input.values()) {
            *cell = value;
        }
    }
    let columns = MODEL_INPUT_COLUMNS.iter().map(|c| c.to_string()).collect();
    Ok(FeatureMatrix::new(columns, values)?)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid record {index}: {source}")]
    InvalidRecord {
        index: usize,
        #[source]
        source: ValidationError,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRecord { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A loaded model plus the request logger and clock used when serving it.
pub struct PredictionService {
    pipeline: Pipeline,
    logger: Arc<dyn RequestLogger>,
    clock: Arc<dyn Clock>,
}

impl PredictionService {
    pub fn new(pipeline: Pipeline, logger: Arc<dyn RequestLogger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pipeline,
            logger,
            clock,
        }
    }

    /// Load a `model.bin` artifact, logging requests through `tracing`.
    pub fn from_path(model_path: &Path) -> Result<Self, ArtifactError> {
        let pipeline: Pipeline = load_model(model_path)?;
        tracing::info!(path = %model_path.display(), "Loaded model for serving");
        Ok(Self::new(
            pipeline,
            Arc::new(TracingRequestLogger),
            Arc::new(SystemClock),
        ))
    }

    /// Validate, log and predict every row. Nothing is logged or predicted
    /// if any row is invalid.
    pub fn predict(&self, inputs: &[ModelInput]) -> Result<Vec<f64>, ServiceError> {
        for (index, input) in inputs.iter().enumerate() {
            input
                .validate()
                .map_err(|source| ServiceError::InvalidRecord { index, source })?;
        }

        let received_at = self.clock.now_utc();
        for input in inputs {
            self.logger.log(received_at, input);
        }

        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let predictions = self.pipeline.predict(&to_feature_matrix(inputs)?)?;
        Ok(predictions.to_vec())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Routes: `POST /predict` and `GET /get`.
pub fn router(service: Arc<PredictionService>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/get", get(health))
        .layer(Extension(service))
}

async fn predict(
    Extension(service): Extension<Arc<PredictionService>>,
    Json(inputs): Json<Vec<ModelInput>>,
) -> Result<Json<Vec<f64>>, (StatusCode, String)> {
    let result = tokio::task::spawn_blocking(move || service.predict(&inputs))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match result {
        Ok(predictions) => Ok(Json(predictions)),
        Err(e) => {
            tracing::warn!(error = %e, "Rejected prediction request");
            Err((e.status(), e.to_string()))
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
