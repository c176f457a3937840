use std::path::Path;
use std::process::exit;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use log::{error, info};
use multus_hostnet_core::kubernetes::operations::{annotate_pod, create_in_cluster_client};
use multus_hostnet_core::links::{determine_new_link_name, RouteClient};
use multus_hostnet_core::migration::{
    capture_link_state, configure_link, locate_holder_netns, migrate_link,
};
use multus_hostnet_core::netns::Netns;
use multus_hostnet_core::{MIGRATED_LINK_PREFIX, MIGRATION_ANNOTATION, NETNS_REGISTRY_DIR};

use crate::config::SetupJobConfig;

mod config;

#[tokio::main]
async fn main() {
    configure_logger();

    let config = match SetupJobConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("{error}");
            exit(1)
        }
    };
    info!("The multus interface is '{}'", config.multus_iface);

    let client = create_client().await;

    info!("Searching for the namespace holding {}...", config.holder_ip);
    let holder_namespace =
        match locate_holder_netns(Path::new(NETNS_REGISTRY_DIR), config.holder_ip).await {
            Ok(namespace) => namespace,
            Err(error) => {
                error!("Couldn't find the holder network namespace! {error:?}");
                exit(3)
            }
        };

    let host_namespace = match Netns::current() {
        Ok(namespace) => namespace,
        Err(error) => {
            error!("Couldn't open the host network namespace! {error:?}");
            exit(4)
        }
    };

    let new_link_name = match determine_host_link_name().await {
        Ok(name) => name,
        Err(error) => {
            error!("Couldn't derive a link name on the host! {error:?}");
            exit(5)
        }
    };
    info!("New multus link name determined: '{new_link_name}'");

    let state = match capture_link_state(&holder_namespace, &config.multus_iface).await {
        Ok(state) => state,
        Err(error) => {
            error!("Couldn't capture the multus link state! {error:?}");
            exit(6)
        }
    };

    if let Err(error) = migrate_link(
        &holder_namespace,
        &host_namespace,
        &config.multus_iface,
        &new_link_name,
    )
    .await
    {
        error!("Couldn't migrate the multus interface! {error:?}");
        exit(7)
    }

    if let Err(error) =
        configure_link(&host_namespace, &new_link_name, &state, config.apply_routes).await
    {
        error!("Couldn't configure the migrated interface! {error:?}");
        exit(8)
    }

    // The hand-off happens last: a written annotation always names a link
    // that already exists in the host namespace.
    let pod_api: Api<Pod> = Api::namespaced(client, &config.controller_namespace);
    if let Err(error) = annotate_pod(
        &pod_api,
        &config.controller_name,
        MIGRATION_ANNOTATION,
        &new_link_name,
    )
    .await
    {
        error!("Couldn't annotate the controller pod! {error:?}");
        exit(9)
    }

    info!(
        "Interface '{}' migrated to the host namespace as '{new_link_name}'",
        config.multus_iface
    );
}

/// Picks the next free migrated-link name from the host's current
/// interfaces.
async fn determine_host_link_name() -> Result<String, multus_hostnet_core::links::LinkError> {
    let interfaces = RouteClient::new()?.interfaces().await?;

    determine_new_link_name(
        interfaces.iter().map(|interface| interface.name.as_str()),
        MIGRATED_LINK_PREFIX,
    )
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
