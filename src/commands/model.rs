//! `mlp model` - deploy and manage model-serving endpoints

use clap::{Args, Subcommand, ValueEnum};

use crate::config::{self, Config};
use crate::format::print_table;
use crate::poll::stream_logs;
use crate::serve::{delete_model, deploy_model, list_models, service_url, ServeParams};
use crate::validate::{validate_model_uri, validate_name};
use crate::{Error, Result};

/// Model subcommands
#[derive(Subcommand, Debug)]
pub enum ModelCommands {
    /// Deploy a trained model as a REST endpoint
    ///
    /// Creates (or replaces) a Deployment and a cluster-internal Service
    /// serving the model over HTTP.
    Deploy(DeployArgs),

    /// List deployed models in the configured namespace
    List(ListArgs),

    /// Delete a deployed model (Deployment and Service together)
    Delete(DeleteArgs),

    /// Stream logs from a deployed model's pods
    Logs(LogsArgs),
}

/// Arguments for `model deploy`
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Model name; also the Deployment and Service name
    model_name: String,

    /// MLflow model URI (e.g. models:/my-model/1 or runs:/run-id/model)
    #[arg(short = 'u', long)]
    model_uri: String,

    /// Number of replicas
    #[arg(short, long, default_value_t = 1)]
    replicas: i32,

    /// CPU request (e.g. "500m", "1")
    #[arg(long, default_value = "500m")]
    cpu: String,

    /// Memory request (e.g. "512Mi", "1Gi")
    #[arg(long, default_value = "1Gi")]
    memory: String,

    /// Port for the model service
    #[arg(long, default_value_t = 8080)]
    port: i32,

    /// Environment variables (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "env")]
    env: Vec<String>,
}

/// Arguments for `model list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by availability
    #[arg(short, long, value_enum, default_value_t = ModelStatusFilter::All)]
    status: ModelStatusFilter,
}

/// Arguments for `model delete`
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Model name
    model_name: String,
}

/// Arguments for `model logs`
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Model name
    model_name: String,

    /// Follow log output
    #[arg(short, long)]
    follow: bool,

    /// Number of lines to show from the end of logs
    #[arg(short, long, default_value_t = 50)]
    tail: i64,
}

/// Availability filter for `model list`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatusFilter {
    /// Every model
    All,
    /// Models with every desired replica ready
    Available,
    /// Models with unready replicas
    Unavailable,
}

impl ModelStatusFilter {
    fn as_availability(self) -> Option<bool> {
        match self {
            ModelStatusFilter::All => None,
            ModelStatusFilter::Available => Some(true),
            ModelStatusFilter::Unavailable => Some(false),
        }
    }
}

/// Dispatch a model subcommand
pub async fn run(cmd: ModelCommands, config: &Config) -> Result<()> {
    match cmd {
        ModelCommands::Deploy(args) => deploy(args, config).await,
        ModelCommands::List(args) => list(args, config).await,
        ModelCommands::Delete(args) => delete(args, config).await,
        ModelCommands::Logs(args) => logs(args, config).await,
    }
}

async fn deploy(args: DeployArgs, config: &Config) -> Result<()> {
    if !validate_name(&args.model_name) {
        return Err(Error::validation(format!(
            "invalid model name '{}': use lowercase alphanumeric, hyphens, \
             and underscores (3-50 chars)",
            args.model_name
        )));
    }
    if !validate_model_uri(&args.model_uri) {
        return Err(Error::validation(format!(
            "invalid model URI '{}': expected models:/..., runs:/..., \
             or a storage URI",
            args.model_uri
        )));
    }
    if args.replicas < 1 {
        return Err(Error::validation("replicas must be at least 1"));
    }

    let mut env = super::parse_env_pairs(&args.env)?;
    env.insert(
        "MLFLOW_TRACKING_URI".to_string(),
        config.mlflow.tracking_uri.clone(),
    );

    let namespace = config.kubernetes.namespace.clone();
    let params = ServeParams {
        model_name: args.model_name.clone(),
        model_uri: args.model_uri,
        replicas: args.replicas,
        cpu: args.cpu,
        memory: args.memory,
        port: args.port,
        env,
        namespace: namespace.clone(),
    };

    let client = config::kube_client(config).await?;
    deploy_model(&client, &params).await?;

    let url = service_url(&args.model_name, &namespace, args.port);
    println!("Model '{}' deployed", args.model_name);
    println!("Service URL: {}", url);
    println!("Test the endpoint:");
    println!(
        "  curl -X POST {}/invocations -H 'Content-Type: application/json' \
         -d '{{\"data\": [[1,2,3,4]]}}'",
        url
    );
    Ok(())
}

async fn list(args: ListArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    let records = list_models(
        &client,
        &config.kubernetes.namespace,
        args.status.as_availability(),
    )
    .await?;

    if records.is_empty() {
        println!(
            "No model deployments found in namespace '{}'",
            config.kubernetes.namespace
        );
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                format!("{}/{}", r.ready, r.replicas),
                if r.available { "yes" } else { "no" }.to_string(),
                r.age.clone(),
                r.service_url.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["NAME", "READY", "AVAILABLE", "AGE", "SERVICE-URL"], &rows);
    Ok(())
}

async fn delete(args: DeleteArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    delete_model(&client, &config.kubernetes.namespace, &args.model_name).await?;
    println!("Model '{}' deleted", args.model_name);
    Ok(())
}

async fn logs(args: LogsArgs, config: &Config) -> Result<()> {
    let client = config::kube_client(config).await?;
    let selector = format!("app={}", args.model_name);
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
        None => println!("No pods found for model {}", args.model_name),
    }
    Ok(())
}
