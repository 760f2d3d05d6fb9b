//! Training image catalog and framework detection
//!
//! Image resolution is an explicit call made once per `experiment run`
//! invocation, never at process start. Overrides come from
//! `MLP_TRAINING_IMAGE_*` environment variables, typically exported by the
//! infrastructure layer that builds the per-framework images.

use std::path::Path;

/// Fallback image when no framework-specific image is configured
pub const DEFAULT_TRAINING_IMAGE: &str = "python:3.10-slim";

/// ML framework detected from an experiment directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    /// PyTorch
    Pytorch,
    /// TensorFlow
    Tensorflow,
    /// scikit-learn (also the fallback)
    Sklearn,
}

/// Per-framework training images, resolved once per invocation
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    pytorch: String,
    tensorflow: String,
    sklearn: String,
}

impl ImageCatalog {
    /// Resolve the catalog from environment overrides.
    pub fn resolve() -> Self {
        let get = |var: &str| std::env::var(var).unwrap_or_else(|_| DEFAULT_TRAINING_IMAGE.to_string());
        Self {
            pytorch: get("MLP_TRAINING_IMAGE_PYTORCH"),
            tensorflow: get("MLP_TRAINING_IMAGE_TENSORFLOW"),
            sklearn: get("MLP_TRAINING_IMAGE_SKLEARN"),
        }
    }

    /// Image for the given framework
    pub fn image_for(&self, framework: Framework) -> &str {
        match framework {
            Framework::Pytorch => &self.pytorch,
            Framework::Tensorflow => &self.tensorflow,
            Framework::Sklearn => &self.sklearn,
        }
    }
}

/// Detect the ML framework used by an experiment directory.
///
/// Checks `experiment.yaml` for an explicit `framework:` key, then sniffs
/// `requirements.txt` for torch/tensorflow. Defaults to sklearn.
pub fn detect_framework(experiment_path: &Path) -> Framework {
    let experiment_yaml = experiment_path.join("experiment.yaml");
    if let Ok(content) = std::fs::read_to_string(&experiment_yaml) {
        if let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(&content) {
            if let Some(framework) = doc.get("framework").and_then(|v| v.as_str()) {
                match framework {
                    "pytorch" => return Framework::Pytorch,
                    "tensorflow" => return Framework::Tensorflow,
                    "sklearn" | "simple" => return Framework::Sklearn,
                    other => {
                        tracing::debug!(framework = %other, "unknown framework in experiment.yaml");
                    }
                }
            }
        }
    }

    let requirements = experiment_path.join("requirements.txt");
    if let Ok(content) = std::fs::read_to_string(&requirements) {
        let content = content.to_lowercase();
        if content.contains("torch") {
            return Framework::Pytorch;
        }
        if content.contains("tensorflow") {
            return Framework::Tensorflow;
        }
    }

    Framework::Sklearn
}
