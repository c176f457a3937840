//! Locating the daemon's own pod by correlating pod IPs against the host's
//! live interfaces.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client};
use log::{debug, info};
use thiserror::Error;

use crate::links::{find_interface, InterfaceInfo, LinkError, RouteClient};
use crate::multus::{self, MultusError, NETWORK_ATTACHMENT_ANNOTATION};

#[derive(Debug, Error)]
pub enum SelfLocatorError {
    #[error("Couldn't list candidate pods! Reason: {}", .0)]
    PodList(kube::Error),
    #[error("Couldn't enumerate local interfaces! Reason: {}", .0)]
    Interfaces(#[from] LinkError),
    #[error("'{}' pod reports an invalid IP address '{}'!", .pod, .address)]
    InvalidPodIp { pod: String, address: String },
    #[error("'{}' pod is missing the '{}' annotation!", .0, NETWORK_ATTACHMENT_ANNOTATION)]
    MissingAttachmentAnnotation(String),
    #[error("'{}' pod is missing required metadata!", .0)]
    MissingMetadata(String),
    #[error(transparent)]
    Multus(#[from] MultusError),
    #[error("No candidate pod address matches a local interface!")]
    NoMatchingPod,
}

/// The daemon's identity, derived once at startup.
#[derive(Debug, Clone)]
pub struct SelfDescriptor {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub pod_ip: IpAddr,
    pub multus_interface: String,
}

/// Picks the candidate pod whose recorded IP lives on one of the supplied
/// interfaces. Candidates whose address doesn't resolve are skipped; an
/// address that doesn't parse is fatal; exhausting the candidates is fatal.
pub fn discover_self(
    pods: &[Pod],
    interfaces: &[InterfaceInfo],
) -> Result<SelfDescriptor, SelfLocatorError> {
    for pod in pods {
        let name = pod.metadata.name.clone().unwrap_or_default();

        let Some(address) = pod.status.as_ref().and_then(|status| status.pod_ip.as_deref())
        else {
            debug!("'{name}' pod has no address assigned yet, skipping");
            continue;
        };

        let address: IpAddr = address.parse().map_err(|_| SelfLocatorError::InvalidPodIp {
            pod: name.clone(),
            address: address.to_owned(),
        })?;

        if find_interface(interfaces, &address).is_none() {
            debug!("'{name}' pod address {address} is not local, skipping");
            continue;
        }

        // This pod's address lives on one of our interfaces, so it is us.
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| SelfLocatorError::MissingMetadata(name.clone()))?;
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .ok_or_else(|| SelfLocatorError::MissingMetadata(name.clone()))?;
        let attachment = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(NETWORK_ATTACHMENT_ANNOTATION))
            .ok_or_else(|| SelfLocatorError::MissingAttachmentAnnotation(name.clone()))?;

        let configurations = multus::multus_configurations(pod)?;
        let multus_interface =
            multus::find_multus_interface_name(&configurations, attachment, &namespace)?;

        info!("Discovered own pod '{namespace}/{name}' on node '{node_name}' ({address})");

        return Ok(SelfDescriptor {
            name,
            namespace,
            node_name,
            pod_ip: address,
            multus_interface,
        });
    }

    Err(SelfLocatorError::NoMatchingPod)
}

/// Lists the candidate pods and the host's interfaces, then defers to
/// [`discover_self`].
pub async fn discover_self_on_host(
    client: &Client,
    pod_namespace: &str,
    label_selector: &str,
) -> Result<SelfDescriptor, SelfLocatorError> {
    let pod_api: Api<Pod> = Api::namespaced(client.clone(), pod_namespace);
    let pods = pod_api
        .list(&ListParams::default().labels(label_selector))
        .await
        .map_err(SelfLocatorError::PodList)?;

    let interfaces = RouteClient::new()?.interfaces().await?;

    discover_self(&pods.items, &interfaces)
}
