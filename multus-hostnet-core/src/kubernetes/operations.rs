use anyhow::Context;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::PostParams, Api, Client};
use log::info;
use thiserror::Error;

/// Creates a client from the in-cluster service account environment.
pub async fn create_in_cluster_client() -> anyhow::Result<Client> {
    Client::try_default()
        .await
        .context("Couldn't create the cluster API client!")
}

#[derive(Debug, Error)]
pub enum PodError {
    #[error("Couldn't fetch the '{}' pod! Reason: {}", .pod, .source)]
    Get { pod: String, source: kube::Error },
    #[error("Couldn't update the '{}' pod! Reason: {}", .pod, .source)]
    Update { pod: String, source: kube::Error },
    #[error("'{}' pod is missing the '{}' annotation!", .pod, .key)]
    MissingAnnotation { pod: String, key: String },
}

/// The slice of the pod API the annotation hand-off needs. Implemented for
/// `Api<Pod>`; tests substitute an in-memory fake.
#[allow(async_fn_in_trait)]
pub trait PodInterface {
    async fn get_pod(&self, name: &str) -> Result<Pod, kube::Error>;
    async fn replace_pod(&self, name: &str, pod: &Pod) -> Result<Pod, kube::Error>;
}

impl PodInterface for Api<Pod> {
    async fn get_pod(&self, name: &str) -> Result<Pod, kube::Error> {
        self.get(name).await
    }

    async fn replace_pod(&self, name: &str, pod: &Pod) -> Result<Pod, kube::Error> {
        self.replace(name, &PostParams::default(), pod).await
    }
}

/// Sets a single annotation on a pod with a fetch-modify-replace cycle. A
/// rejected update (e.g. a concurrent modification) is fatal; there is no
/// retry.
pub async fn annotate_pod(
    api: &impl PodInterface,
    name: &str,
    key: &str,
    value: &str,
) -> Result<(), PodError> {
    let mut pod = api.get_pod(name).await.map_err(|source| PodError::Get {
        pod: name.to_owned(),
        source,
    })?;

    pod.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_owned(), value.to_owned());

    api.replace_pod(name, &pod)
        .await
        .map_err(|source| PodError::Update {
            pod: name.to_owned(),
            source,
        })?;

    info!("Annotated '{name}' pod with {key}={value}");

    Ok(())
}

/// Reads a single annotation off a pod. A missing key is the distinct
/// [`PodError::MissingAnnotation`].
pub async fn pod_annotation(
    api: &impl PodInterface,
    name: &str,
    key: &str,
) -> Result<String, PodError> {
    let pod = api.get_pod(name).await.map_err(|source| PodError::Get {
        pod: name.to_owned(),
        source,
    })?;

    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .cloned()
        .ok_or_else(|| PodError::MissingAnnotation {
            pod: name.to_owned(),
            key: key.to_owned(),
        })
}
