use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bike_demand::{PredictionService, Runner, SplitName, SystemClock, service};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "bike-demand")]
#[command(about = "Bike rental demand model - training, evaluation and serving")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train with the configured hyperparameters and save a new model version
    Train {
        /// Pipeline config file (YAML)
        config: PathBuf,
    },
    /// Grid-search the configured parameter grid and save the best model
    FindHyperparams {
        /// Pipeline config file (YAML)
        config: PathBuf,
    },
    /// Evaluate a saved model version and write a report
    Eval {
        /// Pipeline config file (YAML)
        config: PathBuf,
        /// Model version (directory name under export.output_dir)
        model_version: String,
        /// Splits to evaluate
        #[arg(long, value_delimiter = ',', default_value = "train,test")]
        splits: Vec<SplitName>,
    },
    /// Serve predictions over HTTP
    Serve {
        /// Path to a model.bin artifact
        #[arg(long)]
        model_path: PathBuf,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("bike_demand=debug");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let runner = Runner::new(Arc::new(SystemClock));

    match args.command {
        Command::Train { config } => {
            let version = runner.train(&config)?;
            tracing::info!("Saved model version '{}'", version);
        }
        Command::FindHyperparams { config } => {
            let version = runner.find_hyperparams(&config)?;
            tracing::info!("Saved best model as version '{}'", version);
        }
        Command::Eval {
            config,
            model_version,
            splits,
        } => {
            let path = runner.eval(&config, &model_version, &splits)?;
            tracing::info!("Wrote evaluation report to {}", path.display());
        }
        Command::Serve { model_path, addr } => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(serve(model_path, addr))?;
        }
    }

    Ok(())
}

/// Load the model and serve it until the process is stopped
async fn serve(model_path: PathBuf, addr: SocketAddr) -> Result<()> {
    let service = PredictionService::from_path(&model_path)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    let app = service::router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Serving predictions on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
