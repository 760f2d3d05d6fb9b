//! mlp configuration stored at `~/.mlp/config.yaml`.
//!
//! Three settings namespaces: the Kubernetes context/namespace every
//! operation targets, the MLflow tracking backend, and the DVC data remote.
//! The file is loaded once per invocation and passed by reference into the
//! core operations; a missing file means defaults.

use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".mlp";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Kubernetes configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Kubeconfig context to use; `None` means the current context
    pub context: Option<String>,
    /// Namespace all resources are created in
    pub namespace: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            context: None,
            namespace: "ml-platform".to_string(),
        }
    }
}

/// MLflow configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlflowConfig {
    /// Tracking server URI as reachable from the operator's machine
    pub tracking_uri: String,
    /// Artifact store root URI
    pub artifact_root: String,
}

impl Default for MlflowConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "http://localhost:5000".to_string(),
            artifact_root: "s3://mlp-artifacts".to_string(),
        }
    }
}

/// DVC configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DvcConfig {
    /// Data remote URI
    pub remote: String,
}

impl Default for DvcConfig {
    fn default() -> Self {
        Self {
            remote: "s3://mlp-data".to_string(),
        }
    }
}

/// Main configuration model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kubernetes settings
    pub kubernetes: KubernetesConfig,
    /// MLflow settings
    pub mlflow: MlflowConfig,
    /// DVC settings
    pub dvc: DvcConfig,
}

/// Path to `~/.mlp/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::validation("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl Config {
    /// Load configuration from `~/.mlp/config.yaml`, returning defaults if missing
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// In-cluster MLflow tracking URI for workloads running inside the namespace
    pub fn cluster_tracking_uri(&self) -> String {
        format!(
            "http://mlflow-server.{}.svc.cluster.local:5000",
            self.kubernetes.namespace
        )
    }
}

/// Build a Kubernetes client honoring the configured context.
///
/// With no context configured, kube defaults apply (`KUBECONFIG` env,
/// `~/.kube/config`, or in-cluster config).
pub async fn kube_client(config: &Config) -> Result<Client> {
    match config.kubernetes.context.as_deref() {
        Some(context) => {
            let kubeconfig = Kubeconfig::read().map_err(|e| {
                Error::validation(format!("failed to read kubeconfig: {}", e))
            })?;
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            };
            let kube_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::validation(format!(
                        "failed to load kubeconfig context '{}': {}",
                        context, e
                    ))
                })?;
            Ok(Client::try_from(kube_config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}
