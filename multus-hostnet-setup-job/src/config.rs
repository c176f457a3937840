use std::env::{self, VarError};
use std::net::{AddrParseError, IpAddr};

use thiserror::Error;

pub const HOLDER_IP_ENV: &str = "HOLDER_IP";
pub const MULTUS_IFACE_ENV: &str = "MULTUS_IFACE";
pub const CONTROLLER_NAME_ENV: &str = "CONTROLLER_NAME";
pub const CONTROLLER_NAMESPACE_ENV: &str = "CONTROLLER_NAMESPACE";

#[derive(Debug, Error)]
pub enum FromEnvError {
    #[error("{} environment variable unavailable: {}", .name, .source)]
    VarUnset { name: &'static str, source: VarError },
    #[error("{} is not a valid IP address: {}", HOLDER_IP_ENV, .0)]
    InvalidHolderIp(AddrParseError),
}

/// Parameters handed to the setup job by the controller through the job
/// manifest's environment.
#[derive(Debug, Clone)]
pub struct SetupJobConfig {
    pub holder_ip: IpAddr,
    pub multus_iface: String,
    pub controller_name: String,
    pub controller_namespace: String,
    /// Captured routes are carried along but not reapplied.
    pub apply_routes: bool,
}

impl SetupJobConfig {
    pub fn from_env() -> Result<Self, FromEnvError> {
        Ok(Self {
            holder_ip: var(HOLDER_IP_ENV)?
                .parse()
                .map_err(FromEnvError::InvalidHolderIp)?,
            multus_iface: var(MULTUS_IFACE_ENV)?,
            controller_name: var(CONTROLLER_NAME_ENV)?,
            controller_namespace: var(CONTROLLER_NAMESPACE_ENV)?,
            apply_routes: false,
        })
    }
}

fn var(name: &'static str) -> Result<String, FromEnvError> {
    env::var(name).map_err(|source| FromEnvError::VarUnset { name, source })
}
