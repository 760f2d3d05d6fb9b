//! Training Job construction, submission, listing, and deletion
//!
//! A training run is one `batch/v1` Job named `{name}-{unix seconds}`. Its
//! code travels as a ConfigMap bundle named `{job}-code`, mounted read-only
//! at `/workspace`; the entrypoint copies everything into a writable
//! `/work`, restoring the directory tree from the flattened bundle keys,
//! before installing dependencies and running `train.py`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, Pod, PodSpec, PodTemplateSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

use crate::bundle::{apply_bundle, delete_bundle, Bundle};
use crate::format::format_age;
use crate::{Error, Result};

/// Extended resource name for GPU requests
const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Pod recreation attempts before the orchestrator marks the job failed
const BACKOFF_LIMIT: i32 = 3;

/// Retention window for finished jobs before garbage collection (24h)
const TTL_SECONDS_AFTER_FINISHED: i32 = 86400;

/// Mount path of the read-only code bundle
const BUNDLE_MOUNT_PATH: &str = "/workspace";

/// Writable workspace the entrypoint copies code into
const WORK_DIR: &str = "/work";

/// Container entrypoint: restore the directory tree from flattened bundle
/// keys (`__` back to `/`), then install and train from the writable copy.
/// The copy exists because ConfigMap mounts are read-only.
const TRAIN_ENTRYPOINT: &str = r#"set -e
mkdir -p /work
cd /workspace
for f in *; do
  if [[ "$f" == *__* ]]; then
    target="/work/$(echo "$f" | sed 's/__/\//g')"
    mkdir -p "$(dirname "$target")"
    cp "$f" "$target"
  else
    cp "$f" "/work/$f"
  fi
done
cd /work
pip install -r requirements.txt
python train.py
"#;

/// Parameters for one training job submission
#[derive(Debug, Clone)]
pub struct JobParams {
    /// User-supplied job name (validated, without the timestamp suffix)
    pub name: String,
    /// Container image to train in
    pub image: String,
    /// CPU request/limit (e.g. "1", "500m")
    pub cpu: String,
    /// Memory request/limit (e.g. "2Gi")
    pub memory: String,
    /// GPU count; zero means no GPU resource is requested
    pub gpu: u32,
    /// Environment variables injected into the trainer container
    pub env: BTreeMap<String, String>,
    /// Target namespace
    pub namespace: String,
}

/// Derived job status from the orchestrator's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// At least one pod is active
    Running,
    /// No active pods, at least one succeeded
    Completed,
    /// No active or succeeded pods, at least one failed
    Failed,
    /// No counters reported yet
    Unknown,
}

impl JobPhase {
    /// Classify (active, succeeded, failed) counters.
    ///
    /// The counters are not mutually exclusive at every instant, so
    /// precedence is fixed: Running > Completed > Failed > Unknown.
    pub fn from_counters(active: i32, succeeded: i32, failed: i32) -> Self {
        if active > 0 {
            JobPhase::Running
        } else if succeeded > 0 {
            JobPhase::Completed
        } else if failed > 0 {
            JobPhase::Failed
        } else {
            JobPhase::Unknown
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Derive the phase of a Job from its reported status
pub fn derive_phase(job: &Job) -> JobPhase {
    let status = job.status.as_ref();
    JobPhase::from_counters(
        status.and_then(|s| s.active).unwrap_or(0),
        status.and_then(|s| s.succeeded).unwrap_or(0),
        status.and_then(|s| s.failed).unwrap_or(0),
    )
}

/// Derive the full job name for a submission at the given time.
///
/// Whole-second resolution means two submissions of the same name within one
/// second collide; [`submit_training_job`] checks for that before creating.
pub fn job_identity(name: &str, unix_secs: u64) -> String {
    format!("{}-{}", name, unix_secs)
}

/// Name of the code bundle paired with a job
pub fn bundle_name(job_name: &str) -> String {
    format!("{}-code", job_name)
}

/// Build the Job descriptor for a submission.
///
/// Requests and limits are set identically (no burst headroom); the GPU
/// extended resource appears on both only when requested.
pub fn build_job(job_name: &str, params: &JobParams) -> Job {
    let mut resources = BTreeMap::new();
    resources.insert("cpu".to_string(), Quantity(params.cpu.clone()));
    resources.insert("memory".to_string(), Quantity(params.memory.clone()));
    if params.gpu > 0 {
        resources.insert(GPU_RESOURCE.to_string(), Quantity(params.gpu.to_string()));
    }

    let env: Vec<EnvVar> = params
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "ml-training".to_string());
    labels.insert("job".to_string(), job_name.to_string());

    let container = Container {
        name: "trainer".to_string(),
        image: Some(params.image.clone()),
        command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
        args: Some(vec![TRAIN_ENTRYPOINT.to_string()]),
        env: (!env.is_empty()).then_some(env),
        resources: Some(ResourceRequirements {
            requests: Some(resources.clone()),
            limits: Some(resources),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "code".to_string(),
            mount_path: BUNDLE_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        working_dir: Some(WORK_DIR.to_string()),
        ..Default::default()
    };

    let volume = Volume {
        name: "code".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(bundle_name(job_name)),
            ..Default::default()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(params.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(TTL_SECONDS_AFTER_FINISHED),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![volume]),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Submit a training job: upsert the code bundle, then create the Job.
///
/// A job of the same derived name already existing (same-second resubmit) is
/// a fatal collision; there is no automatic renaming or replacement.
/// Returns the full job name.
pub async fn submit_training_job(
    client: &Client,
    params: &JobParams,
    bundle: &Bundle,
) -> Result<String> {
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let job_name = job_identity(&params.name, unix_secs);
    let jobs: Api<Job> = Api::namespaced(client.clone(), &params.namespace);

    // Same-second resubmits collide on the derived name; fail before any
    // resource is created rather than after the bundle upsert.
    if jobs.get_opt(&job_name).await?.is_some() {
        return Err(Error::collision("Job", &job_name, &params.namespace));
    }

    apply_bundle(client, &params.namespace, &bundle_name(&job_name), bundle).await?;

    let job = build_job(&job_name, params);
    match jobs.create(&PostParams::default(), &job).await {
        Ok(_) => {
            info!(job = %job_name, namespace = %params.namespace, "created training job");
            Ok(job_name)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            Err(Error::collision("Job", &job_name, &params.namespace))
        }
        Err(e) => Err(e.into()),
    }
}

/// Summary of one training job for listing
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Full job name (including timestamp suffix)
    pub name: String,
    /// Derived status
    pub phase: JobPhase,
    /// Human-readable age since creation
    pub age: String,
    /// Succeeded-pod count
    pub completions: i32,
}

/// List training jobs in a namespace, optionally filtered by phase.
pub async fn list_jobs(
    client: &Client,
    namespace: &str,
    filter: Option<JobPhase>,
) -> Result<Vec<JobRecord>> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(crate::JOB_MARKER_LABEL);
    let list = jobs.list(&params).await?;

    let mut records = Vec::new();
    for job in list.items {
        let phase = derive_phase(&job);
        if let Some(wanted) = filter {
            if phase != wanted {
                continue;
            }
        }
        let name = job.metadata.name.clone().unwrap_or_default();
        let age = job
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| format_age(&t.0))
            .unwrap_or_else(|| "-".to_string());
        let completions = job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0);
        records.push(JobRecord {
            name,
            phase,
            age,
            completions,
        });
    }
    Ok(records)
}

/// Per-container state inside a job's pod
#[derive(Debug, Clone)]
pub struct ContainerDetail {
    /// Container name
    pub name: String,
    /// Whether the container is ready
    pub ready: bool,
    /// Restart count
    pub restarts: i32,
}

/// Per-pod state for a job
#[derive(Debug, Clone)]
pub struct PodDetail {
    /// Pod name
    pub name: String,
    /// Pod phase as reported (Pending, Running, Succeeded, Failed)
    pub phase: String,
    /// Container states
    pub containers: Vec<ContainerDetail>,
}

/// Detailed status of one training job
#[derive(Debug, Clone)]
pub struct JobDetail {
    /// Full job name
    pub name: String,
    /// Active-pod count
    pub active: i32,
    /// Succeeded-pod count
    pub succeeded: i32,
    /// Failed-pod count
    pub failed: i32,
    /// Derived status
    pub phase: JobPhase,
    /// Pods belonging to the job; empty when none are scheduled yet
    pub pods: Vec<PodDetail>,
}

/// Fetch detailed status for a job, including its pods.
///
/// Zero matching pods is an empty list, not an error.
pub async fn get_job_status(client: &Client, namespace: &str, job_name: &str) -> Result<JobDetail> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let job = jobs.get(job_name).await?;

    let pods_api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!("job-name={}", job_name);
    let pods = pods_api
        .list(&ListParams::default().labels(&selector))
        .await?;

    let pod_details = pods
        .items
        .iter()
        .map(|pod| PodDetail {
            name: pod.metadata.name.clone().unwrap_or_default(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            containers: pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|statuses| {
                    statuses
                        .iter()
                        .map(|c| ContainerDetail {
                            name: c.name.clone(),
                            ready: c.ready,
                            restarts: c.restart_count,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    let status = job.status.as_ref();
    Ok(JobDetail {
        name: job_name.to_string(),
        active: status.and_then(|s| s.active).unwrap_or(0),
        succeeded: status.and_then(|s| s.succeeded).unwrap_or(0),
        failed: status.and_then(|s| s.failed).unwrap_or(0),
        phase: derive_phase(&job),
        pods: pod_details,
    })
}

/// Delete a job and its paired code bundle.
///
/// The job is deleted with foreground propagation so its pods go with it.
/// The bundle delete is best-effort; its absence is not an error.
pub async fn delete_job(client: &Client, namespace: &str, job_name: &str) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    jobs.delete(job_name, &DeleteParams::foreground()).await?;
    info!(job = %job_name, "deleted training job");

    if let Err(e) = delete_bundle(client, namespace, &bundle_name(job_name)).await {
        warn!(job = %job_name, error = %e, "failed to delete code bundle");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> JobParams {
        let mut env = BTreeMap::new();
        env.insert("MLFLOW_EXPERIMENT_NAME".to_string(), "churn".to_string());
        env.insert("LR".to_string(), "0.001".to_string());
        JobParams {
            name: "churn".to_string(),
            image: "python:3.10-slim".to_string(),
            cpu: "1".to_string(),
            memory: "2Gi".to_string(),
            gpu: 0,
            env,
            namespace: "ml-platform".to_string(),
        }
    }

    // =========================================================================
    // Story: Status Precedence
    // =========================================================================

    /// Counters are not mutually exclusive; precedence must be deterministic
    /// for every combination.
    #[test]
    fn story_status_precedence_is_deterministic() {
        for &(active, succeeded, failed, expected) in &[
            (1, 0, 0, JobPhase::Running),
            (1, 1, 0, JobPhase::Running),
            (1, 0, 1, JobPhase::Running),
            (1, 1, 1, JobPhase::Running),
            (0, 1, 0, JobPhase::Completed),
            (0, 1, 1, JobPhase::Completed),
            (0, 0, 1, JobPhase::Failed),
            (0, 0, 0, JobPhase::Unknown),
        ] {
            assert_eq!(
                JobPhase::from_counters(active, succeeded, failed),
                expected,
                "counters ({}, {}, {})",
                active,
                succeeded,
                failed
            );
        }
    }

    #[test]
    fn derive_phase_handles_missing_status() {
        let job = Job::default();
        assert_eq!(derive_phase(&job), JobPhase::Unknown);
    }

    #[test]
    fn phase_display_matches_reported_strings() {
        assert_eq!(JobPhase::Running.to_string(), "Running");
        assert_eq!(JobPhase::Completed.to_string(), "Completed");
        assert_eq!(JobPhase::Failed.to_string(), "Failed");
        assert_eq!(JobPhase::Unknown.to_string(), "Unknown");
    }

    // =========================================================================
    // Story: Job Identity
    // =========================================================================

    #[test]
    fn identity_is_name_plus_unix_seconds() {
        assert_eq!(job_identity("churn", 1700000000), "churn-1700000000");
        assert_eq!(bundle_name("churn-1700000000"), "churn-1700000000-code");
    }

    // =========================================================================
    // Story: Job Construction
    // =========================================================================

    #[test]
    fn job_carries_name_namespace_and_labels() {
        let job = build_job("churn-1700000000", &params());
        assert_eq!(job.metadata.name.as_deref(), Some("churn-1700000000"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("ml-platform"));

        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("app"), Some(&"ml-training".to_string()));
        assert_eq!(labels.get("job"), Some(&"churn-1700000000".to_string()));

        // Pod template carries the same labels for log selection
        let template_labels = job
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();
        assert_eq!(template_labels.get("app"), Some(&"ml-training".to_string()));
    }

    #[test]
    fn story_requests_equal_limits() {
        let job = build_job("churn-1700000000", &params());
        let pod_spec = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let resources = pod_spec.containers[0].resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(requests, limits);
        assert_eq!(requests.get("cpu"), Some(&Quantity("1".to_string())));
        assert_eq!(requests.get("memory"), Some(&Quantity("2Gi".to_string())));
        assert!(!requests.contains_key(GPU_RESOURCE));
    }

    #[test]
    fn story_gpu_resource_only_when_requested() {
        let mut p = params();
        p.gpu = 2;
        let job = build_job("churn-1700000000", &p);
        let pod_spec = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let resources = pod_spec.containers[0].resources.as_ref().unwrap();
        assert_eq!(
            resources.requests.as_ref().unwrap().get(GPU_RESOURCE),
            Some(&Quantity("2".to_string()))
        );
        assert_eq!(
            resources.limits.as_ref().unwrap().get(GPU_RESOURCE),
            Some(&Quantity("2".to_string()))
        );
    }

    #[test]
    fn story_bundle_mounted_read_only_with_writable_copy_step() {
        let job = build_job("churn-1700000000", &params());
        let pod_spec = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();

        let volume = &pod_spec.volumes.as_ref().unwrap()[0];
        assert_eq!(
            volume.config_map.as_ref().unwrap().name.as_deref(),
            Some("churn-1700000000-code")
        );

        let container = &pod_spec.containers[0];
        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, BUNDLE_MOUNT_PATH);
        assert_eq!(mount.read_only, Some(true));
        assert_eq!(container.working_dir.as_deref(), Some(WORK_DIR));

        // Entrypoint restores the tree and trains from the writable copy
        let script = &container.args.as_ref().unwrap()[0];
        assert!(script.contains("sed 's/__/\\//g'"));
        assert!(script.contains("pip install -r requirements.txt"));
        assert!(script.contains("python train.py"));
    }

    #[test]
    fn job_lifecycle_policy() {
        let job = build_job("churn-1700000000", &params());
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(3));
        assert_eq!(spec.ttl_seconds_after_finished, Some(86400));
        assert_eq!(
            spec.template.spec.as_ref().unwrap().restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn job_env_is_injected() {
        let job = build_job("churn-1700000000", &params());
        let pod_spec = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let env = pod_spec.containers[0].env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "LR" && e.value.as_deref() == Some("0.001")));
        assert!(env.iter().any(|e| e.name == "MLFLOW_EXPERIMENT_NAME"));
    }
}
