//! Model-serving Deployment + Service construction and upsert
//!
//! A deployed model is a Deployment and a ClusterIP Service sharing one
//! name, co-owned as a unit. Both sides upsert (create, replace on
//! conflict), applied Deployment-first; a Service failure after a fresh
//! Deployment create rolls the Deployment back so no half-deployed model is
//! left behind silently.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

use crate::format::format_age;
use crate::{Error, Result};

/// Health endpoint exposed by the MLflow scoring server
const HEALTH_PATH: &str = "/health";

/// Readiness probe timing: first check 30s in, recheck every 10s
const READINESS_INITIAL_DELAY: i32 = 30;
const READINESS_PERIOD: i32 = 10;

/// Liveness probe timing. Strictly looser than readiness so a slow model
/// load makes the pod unready instead of getting it killed.
const LIVENESS_INITIAL_DELAY: i32 = 120;
const LIVENESS_PERIOD: i32 = 30;

/// Parameters for one model deployment
#[derive(Debug, Clone)]
pub struct ServeParams {
    /// Model name; also the Deployment and Service name
    pub model_name: String,
    /// MLflow model URI (`models:/...`, `runs:/...`, or a storage URI)
    pub model_uri: String,
    /// Desired replica count
    pub replicas: i32,
    /// CPU request/limit
    pub cpu: String,
    /// Memory request/limit
    pub memory: String,
    /// Port the model is served on
    pub port: i32,
    /// Extra environment variables for the serving container
    pub env: BTreeMap<String, String>,
    /// Target namespace
    pub namespace: String,
}

/// Shell command that serves the model referenced by `$MODEL_URI` over HTTP
fn serve_command(port: i32) -> String {
    format!(
        "pip install mlflow && \
         mlflow models serve -m \"$MODEL_URI\" --host 0.0.0.0 --port {}",
        port
    )
}

fn model_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), name.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "mlp".to_string(),
    );
    labels
}

fn http_probe(port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

/// Build the Deployment for a model server
pub fn build_deployment(params: &ServeParams) -> Deployment {
    let mut resources = BTreeMap::new();
    resources.insert("cpu".to_string(), Quantity(params.cpu.clone()));
    resources.insert("memory".to_string(), Quantity(params.memory.clone()));

    let mut env: Vec<EnvVar> = params
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    env.push(EnvVar {
        name: "MODEL_URI".to_string(),
        value: Some(params.model_uri.clone()),
        ..Default::default()
    });

    let labels = model_labels(&params.model_name);
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), params.model_name.clone());

    let container = Container {
        name: "model-server".to_string(),
        image: Some("python:3.10-slim".to_string()),
        command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
        args: Some(vec![serve_command(params.port)]),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: params.port,
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(resources.clone()),
            limits: Some(resources),
            ..Default::default()
        }),
        readiness_probe: Some(http_probe(
            params.port,
            READINESS_INITIAL_DELAY,
            READINESS_PERIOD,
        )),
        liveness_probe: Some(http_probe(
            params.port,
            LIVENESS_INITIAL_DELAY,
            LIVENESS_PERIOD,
        )),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(params.model_name.clone()),
            namespace: Some(params.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(params.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the ClusterIP Service paired with a model Deployment
pub fn build_service(params: &ServeParams) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), params.model_name.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(params.model_name.clone()),
            namespace: Some(params.namespace.clone()),
            labels: Some(model_labels(&params.model_name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: params.port,
                target_port: Some(IntOrString::Int(params.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// How an upsert landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Replaced,
}

async fn upsert_deployment(api: &Api<Deployment>, deployment: &Deployment) -> Result<Applied> {
    let name = deployment.metadata.name.as_deref().unwrap_or_default();
    match api.create(&PostParams::default(), deployment).await {
        Ok(_) => {
            info!(deployment = %name, "created deployment");
            Ok(Applied::Created)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            api.replace(name, &PostParams::default(), deployment).await?;
            info!(deployment = %name, "replaced deployment");
            Ok(Applied::Replaced)
        }
        Err(e) => Err(e.into()),
    }
}

async fn upsert_service(api: &Api<Service>, service: &Service) -> Result<Applied> {
    let name = service.metadata.name.as_deref().unwrap_or_default();
    match api.create(&PostParams::default(), service).await {
        Ok(_) => {
            info!(service = %name, "created service");
            Ok(Applied::Created)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            // Service clusterIP is immutable; carry it over from the live object
            let mut service = service.clone();
            if let Ok(existing) = api.get(name).await {
                service.metadata.resource_version = existing.metadata.resource_version.clone();
                if let (Some(spec), Some(existing_spec)) =
                    (service.spec.as_mut(), existing.spec.as_ref())
                {
                    spec.cluster_ip = existing_spec.cluster_ip.clone();
                }
            }
            api.replace(name, &PostParams::default(), &service).await?;
            info!(service = %name, "replaced service");
            Ok(Applied::Replaced)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deploy a model: upsert its Deployment, then its Service.
///
/// The two applies are not atomic. If the Service apply fails after the
/// Deployment was freshly created, the Deployment is rolled back
/// (best-effort) and a partial-apply error reports the sequence; if the
/// Deployment pre-existed it is left in place and the error says so.
pub async fn deploy_model(client: &Client, params: &ServeParams) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &params.namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &params.namespace);

    let applied = upsert_deployment(&deployments, &build_deployment(params)).await?;

    if let Err(e) = upsert_service(&services, &build_service(params)).await {
        let disposition = match applied {
            Applied::Created => {
                match deployments
                    .delete(&params.model_name, &DeleteParams::default())
                    .await
                {
                    Ok(_) => "freshly created deployment rolled back",
                    Err(rollback_err) => {
                        warn!(
                            model = %params.model_name,
                            error = %rollback_err,
                            "rollback of deployment failed; it is orphaned"
                        );
                        "deployment rollback failed, resource orphaned"
                    }
                }
            }
            Applied::Replaced => "pre-existing deployment left in place with new spec",
        };
        return Err(Error::PartialApply {
            model: params.model_name.clone(),
            message: format!("deployment applied but service apply failed: {}; {}", e, disposition),
        });
    }

    info!(model = %params.model_name, replicas = params.replicas, "model deployed");
    Ok(())
}

/// A model is available when every desired replica is ready
pub fn is_available(ready_replicas: i32, desired_replicas: i32) -> bool {
    desired_replicas > 0 && ready_replicas == desired_replicas
}

/// In-cluster URL of a model's Service
pub fn service_url(model_name: &str, namespace: &str, port: i32) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{}",
        model_name, namespace, port
    )
}

/// Summary of one deployed model for listing
#[derive(Debug, Clone)]
pub struct ModelRecord {
    /// Model (and Deployment/Service) name
    pub name: String,
    /// Desired replica count
    pub replicas: i32,
    /// Ready replica count
    pub ready: i32,
    /// Whether every desired replica is ready
    pub available: bool,
    /// Human-readable age since creation
    pub age: String,
    /// In-cluster service URL, when a serving port is declared
    pub service_url: Option<String>,
}

/// List model deployments, optionally filtered by availability.
pub async fn list_models(
    client: &Client,
    namespace: &str,
    available_filter: Option<bool>,
) -> Result<Vec<ModelRecord>> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let list = deployments
        .list(&ListParams::default().labels(crate::MODEL_MARKER_LABEL))
        .await?;

    let mut records = Vec::new();
    for deployment in list.items {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let replicas = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(0);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let available = is_available(ready, replicas);

        if let Some(wanted) = available_filter {
            if available != wanted {
                continue;
            }
        }

        let age = deployment
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| format_age(&t.0))
            .unwrap_or_else(|| "-".to_string());

        let port = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.containers.first())
            .and_then(|c| c.ports.as_ref())
            .and_then(|p| p.first())
            .map(|p| p.container_port);

        records.push(ModelRecord {
            service_url: port.map(|p| service_url(&name, namespace, p)),
            name,
            replicas,
            ready,
            available,
            age,
        });
    }
    Ok(records)
}

/// Delete a model's Deployment and Service as a unit.
///
/// Absence of either half is not an error; a model may have been partially
/// applied or already cleaned up.
pub async fn delete_model(client: &Client, namespace: &str, model_name: &str) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    match deployments
        .delete(model_name, &DeleteParams::default())
        .await
    {
        Ok(_) => info!(model = %model_name, "deleted deployment"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    match services.delete(model_name, &DeleteParams::default()).await {
        Ok(_) => info!(model = %model_name, "deleted service"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
