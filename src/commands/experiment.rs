//! `mlp experiment` - submit and observe training jobs

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::bundle::Bundle;
use crate::config::{self, Config};
use crate::format::print_table;
use crate::images::{detect_framework, ImageCatalog};
use crate::job::{
    delete_job, get_job_status, list_jobs, submit_training_job, JobParams, JobPhase,
};
use crate::poll::{await_start, stream_logs, DEFAULT_START_TIMEOUT};
use crate::validate::validate_name;
use crate::{Error, Result};

/// Experiment subcommands
#[derive(Subcommand, Debug)]
pub enum ExperimentCommands {
    /// Submit an ML training job to Kubernetes
    ///
    /// Packages the experiment directory into a ConfigMap bundle and submits
    /// it as a batch Job wired into MLflow tracking. The framework (PyTorch,
    /// TensorFlow, scikit-learn) is auto-detected to pick a training image
    /// unless one is given explicitly.
    Run(RunArgs),

    /// List training jobs in the configured namespace
    List(ListArgs),

    /// Show detailed status for a training job, including its pods
    Status(StatusArgs),

    /// Delete a training job and its code bundle
    Delete(DeleteArgs),

    /// Stream logs from a training job's pods
    Logs(LogsArgs),
}

/// Arguments for `experiment run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the experiment directory
    experiment_path: PathBuf,

    /// Job name (default: directory name)
    #[arg(short, long)]
    name: Option<String>,

    /// Docker image for the training job (auto-detected by default)
    #[arg(short, long)]
    image: Option<String>,

    /// CPU request (e.g. "2" or "500m")
    #[arg(long, default_value = "1")]
    cpu: String,

    /// Memory request (e.g. "4Gi" or "512Mi")
    #[arg(long, default_value = "2Gi")]
    memory: String,

    /// Number of GPUs to request
    #[arg(long, default_value_t = 0)]
    gpu: u32,

    /// Environment variables (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "env")]
    env: Vec<String>,

    /// Wait for the job to start, then stream its logs
    #[arg(short, long)]
    wait: bool,
}

/// Arguments for `experiment list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by job status
    #[arg(short, long, value_enum, default_value_t = JobStatusFilter::All)]
    status: JobStatusFilter,
}

/// Arguments for `experiment status`
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Full job name (including timestamp suffix)
    job_name: String,
}

/// Arguments for `experiment delete`
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Full job name (including timestamp suffix)
    job_name: String,
}

/// Arguments for `experiment logs`
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Full job name (including timestamp suffix)
    job_name: String,

    /// Follow log output
    #[arg(short, long)]
    follow: bool,

    /// Number of lines to show from the end of logs
    #[arg(short, long, default_value_t = 50)]
    tail: i64,
}

/// Status filter for `experiment list`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatusFilter {
    /// Every job
    All,
    /// Jobs with an active pod
    Running,
    /// Jobs that succeeded
    Completed,
    /// Jobs that failed
    Failed,
}

impl JobStatusFilter {
    fn as_phase(self) -> Option<JobPhase> {
        match self {
            JobStatusFilter::All => None,
            JobStatusFilter::Running => Some(JobPhase::Running),
            JobStatusFilter::Completed => Some(JobPhase::Completed),
            JobStatusFilter::Failed => Some(JobPhase::Failed),
        }
    }
}

/// Dispatch an experiment subcommand
pub async fn run(cmd: ExperimentCommands, config: &Config) -> Result<()> {
    match cmd {
        ExperimentCommands::Run(args) => run_experiment(args, config).await,
        ExperimentCommands::List(args) => list_experiments(args, config).await,
        ExperimentCommands::Status(args) => show_status(args, config).await,
        ExperimentCommands::Delete(args) => delete_experiment(args, config).await,
        ExperimentCommands::Logs(args) => show_logs(args, config).await,
    }
}

async fn run_experiment(args: RunArgs, config: &Config) -> Result<()> {
    let experiment_path = args.experiment_path.canonicalize().map_err(|e| {
        Error::validation(format!(
            "experiment path {}: {}",
            args.experiment_path.display(),
            e
        ))
    })?;
    if !experiment_path.is_dir() {
        return Err(Error::validation(format!(
            "experiment path {} is not a directory",
            experiment_path.display()
        )));
    }

    let name = match args.name {
        Some(name) => name,
        None => experiment_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::validation("could not derive a job name from the path"))?,
    };
    if !validate_name(&name) {
        return Err(Error::validation(format!(
            "invalid job name '{}': use lowercase alphanumeric, hyphens, \
             and underscores (3-50 chars)",
            name
        )));
    }

    let image = match args.image {
        Some(image) => image,
        None => {
            let framework = detect_framework(&experiment_path);
            let catalog = ImageCatalog::resolve();
            let image = catalog.image_for(framework).to_string();
            println!("Auto-detected framework: {:?}, image: {}", framework, image);
            image
        }
    };

    let mut env = super::parse_env_pairs(&args.env)?;
    // Jobs run in-cluster, so the tracking URI is the in-cluster service
    env.insert(
        "MLFLOW_TRACKING_URI".to_string(),
        config.cluster_tracking_uri(),
    );
    env.insert("MLFLOW_EXPERIMENT_NAME".to_string(), name.clone());

    let namespace = config.kubernetes.namespace.clone();
    println!("Packaging {} ...", experiment_path.display());
    let bundle = Bundle::from_dir(&experiment_path)?;

    let client = config::kube_client(config).await?;
    let params = JobParams {
        name,
        image,
        cpu: args.cpu,
        memory: args.memory,
        gpu: args.gpu,
        env,
        namespace: namespace.clone(),
    };
    let job_name = submit_training_job(&client, &params, &bundle).await?;

    println!("Job '{}' submitted", job_name);
    println!("Monitor with:");
    println!("  mlp experiment status {}", job_name);
    println!("  mlp experiment logs {} --follow", job_name);
    println!("Track the experiment at: {}", config.mlflow.tracking_uri);

    if args.wait {
        println!("Waiting for job to start ...");
        await_start(&client, &job_name, &namespace, DEFAULT_START_TIMEOUT).await?;
        println!("Job started. Streaming logs ...");
        let selector = format!("job-name={}", job_name);
        match stream_logs(&client, &namespace, &selector, true, None).await? {
            Some(logs) => super::print_log_stream(logs).await,
            None => println!("No pods found for job {}", job_name),
        }
    }
    Ok(())
}

async fn list_experiments(args: ListArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    let records = list_jobs(
        &client,
        &config.kubernetes.namespace,
        args.status.as_phase(),
    )
    .await?;

    if records.is_empty() {
        println!(
            "No experiments found in namespace '{}'",
            config.kubernetes.namespace
        );
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                r.phase.to_string(),
                r.age.clone(),
                format!("{}/1", r.completions),
            ]
        })
        .collect();
    print_table(&["NAME", "STATUS", "AGE", "COMPLETIONS"], &rows);
    Ok(())
}

async fn show_status(args: StatusArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    let detail = get_job_status(&client, &config.kubernetes.namespace, &args.job_name).await?;

    println!("Job:       {}", detail.name);
    println!("Status:    {}", detail.phase);
    println!(
        "Counters:  active={} succeeded={} failed={}",
        detail.active, detail.succeeded, detail.failed
    );

    if detail.pods.is_empty() {
        println!("Pods:      none");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = detail
        .pods
        .iter()
        .map(|pod| {
            let ready = pod.containers.iter().filter(|c| c.ready).count();
            let restarts: i32 = pod.containers.iter().map(|c| c.restarts).sum();
            vec![
                pod.name.clone(),
                pod.phase.clone(),
                format!("{}/{}", ready, pod.containers.len()),
                restarts.to_string(),
            ]
        })
        .collect();
    println!();
    print_table(&["POD", "PHASE", "READY", "RESTARTS"], &rows);
    Ok(())
}

async fn delete_experiment(args: DeleteArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    delete_job(&client, &config.kubernetes.namespace, &args.job_name).await?;
    println!("Job '{}' deleted", args.job_name);
    Ok(())
}

async fn show_logs(args: LogsArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    let selector = format!("job-name={}", args.job_name);
    match stream_logs(
        &client,
        &config.kubernetes.namespace,
        &selector,
        args.follow,
        Some(args.tail),
    )
    .await?
    {
        Some(logs) => super::print_log_stream(logs).await,
        None => println!("No pods found for job {}", args.job_name),
    }
    Ok(())
}
