//! Versioned model artifacts - save and load fitted pipelines

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::hyperparams::HyperparameterMapping;
use crate::traits::Clock;

/// File holding the bincode-encoded estimator.
pub const MODEL_FILE: &str = "model.bin";
/// File holding the YAML hyperparameters.
pub const PARAMS_FILE: &str = "params.yml";

/// Errors that can occur while writing or reading artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create artifact directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize model: {0}")]
    SerializeModel(#[source] bincode::Error),
    #[error("failed to serialize hyperparameters: {0}")]
    SerializeParams(#[source] serde_yaml::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model version '{version}' already exists at {}", .path.display())]
    VersionExists { version: String, path: PathBuf },
    #[error("failed to publish artifact {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("artifact file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to deserialize model {}: {source}", .path.display())]
    DeserializeModel {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to deserialize hyperparameters {}: {source}", .path.display())]
    DeserializeParams {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Version name for an artifact saved at `now`: the UTC time truncated to
/// the minute with every `:` replaced by a space, e.g.
/// `2024-06-17 10 30 00+00 00`.
pub fn version_string(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:00+00:00")
        .to_string()
        .replace(':', " ")
}

/// Directory of versioned artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.output_dir.join(version)
    }

    pub fn model_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(MODEL_FILE)
    }

    pub fn params_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(PARAMS_FILE)
    }

    /// Write `estimator` and `hyperparams` under a new version directory and
    /// return the version.
    ///
    /// Both files are written to a staging directory next to the version
    /// directory, which is renamed into place only once both writes succeed.
    /// An existing version is never touched: saving into a version that
    /// already exists fails with [`ArtifactError::VersionExists`].
    pub fn save<M, P>(
        &self,
        estimator: &M,
        hyperparams: &P,
        clock: &dyn Clock,
    ) -> Result<String, ArtifactError>
    where
        M: Serialize + ?Sized,
        P: Serialize + ?Sized,
    {
        let version = version_string(clock.now_utc());
        let dir = self.version_dir(&version);
        if dir.exists() {
            return Err(ArtifactError::VersionExists { version, path: dir });
        }

        let staging = self.staging_dir(&version);
        if staging.exists() {
            tracing::warn!(dir = %staging.display(), "Removing stale staging directory");
            remove_staging(&staging);
        }
        fs::create_dir_all(&staging).map_err(|source| ArtifactError::CreateDir {
            path: staging.clone(),
            source,
        })?;

        let published = write_files(&staging, estimator, hyperparams).and_then(|()| {
            fs::rename(&staging, &dir).map_err(|source| ArtifactError::Publish {
                path: dir.clone(),
                source,
            })
        });

        match published {
            Ok(()) => {
                tracing::info!(version = %version, dir = %dir.display(), "Saved model artifact");
                Ok(version)
            }
            Err(e) => {
                tracing::error!(version = %version, error = %e, "Couldn't save model, rolling back");
                remove_staging(&staging);
                Err(e)
            }
        }
    }

    fn staging_dir(&self, version: &str) -> PathBuf {
        self.output_dir
            .join(format!(".{version}.{}.partial", std::process::id()))
    }

    /// Load the estimator saved as `version`.
    pub fn load<M: DeserializeOwned>(&self, version: &str) -> Result<M, ArtifactError> {
        load_model(&self.model_path(version))
    }

    /// Load the hyperparameters saved with `version`.
    pub fn load_params(&self, version: &str) -> Result<HyperparameterMapping, ArtifactError> {
        let path = self.params_path(version);
        let text = read_file(&path)?;
        serde_yaml::from_slice(&text).map_err(|source| ArtifactError::DeserializeParams { path, source })
    }
}

fn write_files<M, P>(dir: &Path, estimator: &M, hyperparams: &P) -> Result<(), ArtifactError>
where
    M: Serialize + ?Sized,
    P: Serialize + ?Sized,
{
    let model_path = dir.join(MODEL_FILE);
    let bytes = bincode::serialize(estimator).map_err(ArtifactError::SerializeModel)?;
    fs::write(&model_path, bytes).map_err(|source| ArtifactError::Write {
        path: model_path.clone(),
        source,
    })?;

    let params_path = dir.join(PARAMS_FILE);
    let yaml = serde_yaml::to_string(hyperparams).map_err(ArtifactError::SerializeParams)?;
    fs::write(&params_path, yaml).map_err(|source| ArtifactError::Write {
        path: params_path.clone(),
        source,
    })?;

    Ok(())
}

fn remove_staging(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove staging directory");
    }
}

/// Load a bincode-encoded estimator from a model file.
pub fn load_model<M: DeserializeOwned>(path: &Path) -> Result<M, ArtifactError> {
    let bytes = read_file(path)?;
    bincode::deserialize(&bytes).map_err(|source| ArtifactError::DeserializeModel {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ArtifactError::NotFound(path.to_path_buf()),
        _ => ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        },
    })
}
