//! mlp - ML platform CLI for Kubernetes
//!
//! Packages experiment code into cluster-native bundles, submits training
//! jobs, and manages model-serving deployments, with MLflow wired in as the
//! experiment-tracking backend.
//!
//! # Modules
//!
//! - [`bundle`] - Directory packaging into ConfigMap bundles
//! - [`job`] - Training Job construction, submission, and listing
//! - [`poll`] - Job start polling and pod log streaming
//! - [`serve`] - Model Deployment + Service construction and upsert
//! - [`config`] - Persisted CLI configuration (`~/.mlp/config.yaml`)
//! - [`images`] - Training image catalog and framework detection
//! - [`validate`] - Identifier and URI validation
//! - [`format`] - Age formatting and table output
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bundle;
pub mod commands;
pub mod config;
pub mod error;
pub mod format;
pub mod images;
pub mod job;
pub mod poll;
pub mod serve;
pub mod validate;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Marker label applied to every training job submitted by this tool
pub const JOB_MARKER_LABEL: &str = "app=ml-training";

/// Marker label applied to every model deployment managed by this tool
pub const MODEL_MARKER_LABEL: &str = "app.kubernetes.io/managed-by=mlp";

/// mlp - submit ML training jobs and serve models on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "mlp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage ML experiments: submit and observe training jobs
    #[command(subcommand)]
    Experiment(commands::experiment::ExperimentCommands),

    /// Manage ML model deployments
    #[command(subcommand)]
    Model(commands::model::ModelCommands),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = config::Config::load()?;
        match self.command {
            Commands::Experiment(cmd) => commands::experiment::run(cmd, &config).await,
            Commands::Model(cmd) => commands::model::run(cmd, &config).await,
        }
    }
}
