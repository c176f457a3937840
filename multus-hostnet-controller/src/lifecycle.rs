//! The setup → wait → teardown sequence driven by the daemon.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use multus_hostnet_core::detectors::self_locator::SelfDescriptor;
use multus_hostnet_core::kubernetes::jobs::{
    job_name, run_replaceable_job, wait_for_job_completion,
};
use multus_hostnet_core::kubernetes::operations::pod_annotation;
use multus_hostnet_core::resources::templates::{
    template_to_job, TemplateParams, SETUP_JOB_TEMPLATE, TEARDOWN_JOB_TEMPLATE,
};

use crate::config::ControllerConfig;
use crate::error::LifecycleError;

fn template_params(descriptor: &SelfDescriptor) -> TemplateParams {
    TemplateParams {
        node_name: descriptor.node_name.clone(),
        namespace: descriptor.namespace.clone(),
        holder_ip: descriptor.pod_ip.to_string(),
        multus_iface: descriptor.multus_interface.clone(),
        controller_name: descriptor.name.clone(),
        ..Default::default()
    }
}

/// Submits the setup job and blocks until it reaches a terminal state.
pub async fn run_setup_job(
    client: &Client,
    descriptor: &SelfDescriptor,
    config: &ControllerConfig,
) -> Result<(), LifecycleError> {
    let job = template_to_job("setup-job", SETUP_JOB_TEMPLATE, &template_params(descriptor))?;

    let job_api: Api<Job> = Api::namespaced(client.clone(), &descriptor.namespace);
    run_replaceable_job(&job_api, &job).await?;
    wait_for_job_completion(
        &job_api,
        job_name(&job)?,
        config.job_timeout,
        config.job_poll_interval,
    )
    .await?;

    Ok(())
}

/// Reads the interface name the setup job handed off through the pod
/// annotation. Only called after the setup job reported terminal success,
/// so a missing annotation means the hand-off never happened.
pub async fn migrated_interface_name(
    client: &Client,
    descriptor: &SelfDescriptor,
    config: &ControllerConfig,
) -> Result<String, LifecycleError> {
    let pod_api: Api<Pod> = Api::namespaced(client.clone(), &descriptor.namespace);

    Ok(pod_annotation(&pod_api, &descriptor.name, &config.migration_annotation).await?)
}

/// Submits the teardown job. Fire and forget: the process is exiting and
/// nothing is left to await its completion.
pub async fn run_teardown_job(
    client: &Client,
    descriptor: &SelfDescriptor,
    migrated_interface: &str,
) -> Result<(), LifecycleError> {
    let mut params = template_params(descriptor);
    params.migrated_iface = migrated_interface.to_owned();

    let job = template_to_job("teardown-job", TEARDOWN_JOB_TEMPLATE, &params)?;

    let job_api: Api<Job> = Api::namespaced(client.clone(), &descriptor.namespace);
    run_replaceable_job(&job_api, &job).await?;

    Ok(())
}
