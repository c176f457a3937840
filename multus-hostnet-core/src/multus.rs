//! Secondary-network attachment metadata reported by multus on pods.

use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use thiserror::Error;

/// Annotation declaring which secondary networks a pod requested.
pub const NETWORK_ATTACHMENT_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
/// Annotation in which multus reports the realized attachments.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks-status";

#[derive(Debug, Error)]
pub enum MultusError {
    #[error("'{}' pod in '{}' namespace is missing the '{}' annotation!", .pod, .namespace, NETWORK_STATUS_ANNOTATION)]
    MissingStatusAnnotation { pod: String, namespace: String },
    #[error("Couldn't parse the network status annotation! Reason: {}", .0)]
    InvalidStatusAnnotation(serde_json::Error),
    #[error("'{}' network has no matching configuration on the pod!", .0)]
    UnknownNetwork(String),
}

/// One realized secondary-network attachment, as reported in the pod's
/// network status annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct MultusNetworkConfiguration {
    #[serde(rename = "name")]
    pub network_name: String,
    #[serde(rename = "interface", default)]
    pub interface_name: String,
    #[serde(rename = "ips", default)]
    pub ips: Vec<String>,
}

/// Parses a pod's realized attachments. Rebuilt from the pod object on every
/// call; nothing is cached across pod updates.
pub fn multus_configurations(pod: &Pod) -> Result<Vec<MultusNetworkConfiguration>, MultusError> {
    let annotation = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORK_STATUS_ANNOTATION))
        .ok_or_else(|| MultusError::MissingStatusAnnotation {
            pod: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        })?;

    serde_json::from_str(annotation).map_err(MultusError::InvalidStatusAnnotation)
}

/// Resolves the in-pod interface name of a named attachment. The status
/// annotation qualifies network names with their namespace.
pub fn find_multus_interface_name(
    configurations: &[MultusNetworkConfiguration],
    network_name: &str,
    pod_namespace: &str,
) -> Result<String, MultusError> {
    let qualified = format!("{pod_namespace}/{network_name}");

    configurations
        .iter()
        .find(|configuration| configuration.network_name == qualified)
        .map(|configuration| configuration.interface_name.clone())
        .ok_or(MultusError::UnknownNetwork(qualified))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Pod;
    use kube::core::ObjectMeta;

    use super::{
        find_multus_interface_name, multus_configurations, MultusError,
        NETWORK_STATUS_ANNOTATION,
    };

    const STATUS_ANNOTATION: &str = r#"[
        {
            "name": "cbr0",
            "interface": "eth0",
            "ips": ["10.244.1.18"],
            "mac": "aa:51:53:f1:92:01",
            "default": true,
            "dns": {}
        },
        {
            "name": "kube-system/macvlan-conf",
            "interface": "net1",
            "ips": ["10.16.4.7"],
            "mac": "86:f0:9b:e1:76:50",
            "dns": {}
        }
    ]"#;

    fn pod_with_status(annotation: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("multus-hostnet-7vx2p".to_owned()),
                namespace: Some("kube-system".to_owned()),
                annotations: Some(BTreeMap::from([(
                    NETWORK_STATUS_ANNOTATION.to_owned(),
                    annotation.to_owned(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn status_annotation_parses_into_configurations() {
        let configurations = multus_configurations(&pod_with_status(STATUS_ANNOTATION)).unwrap();

        assert_eq!(configurations.len(), 2);
        assert_eq!(configurations[1].network_name, "kube-system/macvlan-conf");
        assert_eq!(configurations[1].interface_name, "net1");
        assert_eq!(configurations[1].ips, ["10.16.4.7"]);
    }

    #[test]
    fn missing_status_annotation_is_an_error() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("multus-hostnet-7vx2p".to_owned()),
                namespace: Some("kube-system".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(
            multus_configurations(&pod),
            Err(MultusError::MissingStatusAnnotation { .. })
        ));
    }

    #[test]
    fn attachment_lookup_matches_the_namespace_qualified_name() {
        let configurations = multus_configurations(&pod_with_status(STATUS_ANNOTATION)).unwrap();

        let interface =
            find_multus_interface_name(&configurations, "macvlan-conf", "kube-system").unwrap();

        assert_eq!(interface, "net1");
    }

    #[test]
    fn attachment_lookup_rejects_unknown_networks() {
        let configurations = multus_configurations(&pod_with_status(STATUS_ANNOTATION)).unwrap();

        assert!(matches!(
            find_multus_interface_name(&configurations, "macvlan-conf", "default"),
            Err(MultusError::UnknownNetwork(_))
        ));
    }
}
