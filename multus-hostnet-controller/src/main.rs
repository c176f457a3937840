use std::process::exit;

use kube::Client;
use log::{error, info};
use multus_hostnet_core::detectors::self_locator::discover_self_on_host;
use multus_hostnet_core::kubernetes::operations::create_in_cluster_client;
use tokio::signal::unix::{signal, SignalKind};

use crate::config::ControllerConfig;
use crate::lifecycle::{migrated_interface_name, run_setup_job, run_teardown_job};

mod config;
mod error;
mod lifecycle;

#[tokio::main]
async fn main() {
    configure_logger();

    info!("Registering the SIGTERM handler...");
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            error!("Couldn't register the SIGTERM handler! {error:?}");
            exit(1)
        }
    };

    let config = ControllerConfig::default();
    let client = create_client().await;

    info!("Looking for our own pod...");
    let descriptor = match discover_self_on_host(
        &client,
        &config.pod_namespace,
        &config.label_selector,
    )
    .await
    {
        Ok(descriptor) => descriptor,
        Err(error) => {
            error!("Couldn't locate the controller's own pod! {error:?}");
            exit(3)
        }
    };

    info!("Running the interface setup job...");
    if let Err(error) = run_setup_job(&client, &descriptor, &config).await {
        error!("Couldn't migrate the multus interface! {error:?}");
        exit(4)
    }

    info!("Interface migrated, waiting for a termination signal...");
    sigterm.recv().await;

    info!("Termination signal received, running the teardown job...");
    let migrated_interface = match migrated_interface_name(&client, &descriptor, &config).await {
        Ok(name) => name,
        Err(error) => {
            error!("Couldn't determine the migrated interface name! {error:?}");
            exit(5)
        }
    };

    info!("Removing migrated interface '{migrated_interface}'...");
    if let Err(error) = run_teardown_job(&client, &descriptor, &migrated_interface).await {
        error!("Couldn't run the teardown job! {error:?}");
        exit(6)
    }
}

async fn create_client() -> Client {
    match create_in_cluster_client().await {
        Ok(client) => client,
        Err(error) => {
            error!("Couldn't create the cluster API client! {error:?}");
            exit(2)
        }
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .init()
}
