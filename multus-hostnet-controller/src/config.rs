use std::time::Duration;

use multus_hostnet_core::kubernetes::jobs::JOB_POLL_INTERVAL;
use multus_hostnet_core::{DAEMON_LABEL_SELECTOR, DAEMON_POD_NAMESPACE, MIGRATION_ANNOTATION};

/// Tunables for the controller daemon. The defaults mirror the deployed
/// manifests.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub pod_namespace: String,
    pub label_selector: String,
    pub migration_annotation: String,
    pub job_timeout: Duration,
    pub job_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pod_namespace: DAEMON_POD_NAMESPACE.to_owned(),
            label_selector: DAEMON_LABEL_SELECTOR.to_owned(),
            migration_annotation: MIGRATION_ANNOTATION.to_owned(),
            job_timeout: Duration::from_secs(60),
            job_poll_interval: JOB_POLL_INTERVAL,
        }
    }
}
