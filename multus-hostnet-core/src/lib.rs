pub mod detectors;
pub mod kubernetes;
pub mod links;
pub mod migration;
pub mod multus;
pub mod netns;
pub mod resources;

/// Annotation on the controller pod carrying the migrated interface name.
pub const MIGRATION_ANNOTATION: &str = "multus-migration";

pub const DAEMON_LABEL_SELECTOR: &str = "app=multus-hostnet";
pub const DAEMON_POD_NAMESPACE: &str = "default";

pub const MIGRATED_LINK_PREFIX: &str = "mlink";
pub const NETNS_REGISTRY_DIR: &str = "/var/run/netns";
