use std::env;
use std::process::exit;

use log::{error, info};
use multus_hostnet_core::migration::delete_link;

const MIGRATED_IFACE_ENV: &str = "MIGRATED_IFACE";

#[tokio::main]
async fn main() {
    configure_logger();

    let migrated_interface = match env::var(MIGRATED_IFACE_ENV) {
        Ok(name) => name,
        Err(_) => {
            error!("{MIGRATED_IFACE_ENV} environment variable unavailable!");
            exit(1)
        }
    };

    info!("Removing migrated interface '{migrated_interface}'...");
    if let Err(error) = delete_link(&migrated_interface).await {
        error!("Couldn't remove the migrated interface! {error:?}");
        exit(2)
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .init()
}
