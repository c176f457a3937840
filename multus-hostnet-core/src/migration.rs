//! Capturing link state and moving a link between network namespaces.

use std::future::Future;
use std::net::IpAddr;
use std::os::fd::AsRawFd;
use std::path::Path;

use ipnet::IpNet;
use log::{info, warn};
use netlink_packet_route::{address::AddressMessage, route::RouteMessage};
use thiserror::Error;
use tokio::runtime::Handle as RuntimeHandle;

use crate::links::{self, find_interface, LinkError, RouteClient};
use crate::netns::{Netns, NetnsError};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Network namespace operation failed! Reason: {}", .0)]
    Netns(#[from] NetnsError),
    #[error("Netlink operation failed! Reason: {}", .0)]
    Link(#[from] LinkError),
    #[error("No network namespace holds an interface with address {}!", .0)]
    HolderNamespaceNotFound(IpAddr),
    #[error("'{}/{}' is not a valid address prefix!", .address, .prefix_len)]
    InvalidPrefix { address: IpAddr, prefix_len: u8 },
}

/// One address captured from a link before migration. The label is the
/// kernel's interface-scoped address label, which must be rewritten to the
/// new link name before the address can be reapplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAddress {
    pub net: IpNet,
    pub label: Option<String>,
}

/// Address and route state captured from a link in its source namespace.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    pub addresses: Vec<CapturedAddress>,
    pub routes: Vec<RouteMessage>,
}

impl LinkState {
    /// Returns a copy with every IPv4 address label rewritten to
    /// `link_name`. The kernel keys an interface's address table by
    /// address + label and rejects labels that don't match the owning
    /// interface's name.
    pub fn relabeled(&self, link_name: &str) -> LinkState {
        LinkState {
            addresses: self
                .addresses
                .iter()
                .map(|address| CapturedAddress {
                    net: address.net,
                    label: if address.net.addr().is_ipv4() {
                        Some(link_name.to_owned())
                    } else {
                        address.label.clone()
                    },
                })
                .collect(),
            routes: self.routes.clone(),
        }
    }
}

fn captured_address(message: &AddressMessage) -> Result<Option<CapturedAddress>, MigrationError> {
    let Some(address) = links::address_ip(message) else {
        return Ok(None);
    };

    let prefix_len = message.header.prefix_len;
    let net = IpNet::new(address, prefix_len)
        .map_err(|_| MigrationError::InvalidPrefix { address, prefix_len })?;

    Ok(Some(CapturedAddress {
        net,
        label: links::address_label(message).map(str::to_owned),
    }))
}

/// Runs an async netlink action on a dedicated thread inside `namespace`.
/// The route socket is opened after the namespace switch, so every request
/// issued through it addresses that namespace.
async fn within_namespace<T, F, Fut>(namespace: &Netns, f: F) -> Result<T, MigrationError>
where
    F: FnOnce(RouteClient) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, LinkError>>,
    T: Send + 'static,
{
    let runtime = RuntimeHandle::try_current().map_err(|_| LinkError::NoRuntime)?;

    let result = namespace
        .execute(move || {
            runtime.block_on(async move {
                let client = RouteClient::new()?;
                f(client).await
            })
        })
        .await?;

    Ok(result?)
}

/// Scans the namespace registry for the namespace holding an interface with
/// `holder_ip`. Namespaces that can't be opened or inspected are skipped;
/// only exhausting the registry is fatal.
pub async fn locate_holder_netns(
    registry: &Path,
    holder_ip: IpAddr,
) -> Result<Netns, MigrationError> {
    for name in Netns::list_names(registry)? {
        let namespace = match Netns::open(registry, &name) {
            Ok(namespace) => namespace,
            Err(error) => {
                warn!("Couldn't open network namespace '{name}', continuing the search... {error:?}");
                continue;
            }
        };

        let found = within_namespace(&namespace, move |client| async move {
            let interfaces = client.interfaces().await?;

            Ok(find_interface(&interfaces, &holder_ip).is_some())
        })
        .await;

        match found {
            Ok(true) => {
                info!("Network namespace '{name}' holds {holder_ip}");
                return Ok(namespace);
            }
            Ok(false) => continue,
            Err(error) => {
                warn!("Couldn't inspect network namespace '{name}', continuing the search... {error:?}");
                continue;
            }
        }
    }

    Err(MigrationError::HolderNamespaceNotFound(holder_ip))
}

/// Reads a link's addresses and routes inside `namespace`. Must run before
/// the link is taken down or renamed.
pub async fn capture_link_state(
    namespace: &Netns,
    link_name: &str,
) -> Result<LinkState, MigrationError> {
    let name = link_name.to_owned();
    let (messages, routes) = within_namespace(namespace, move |client| async move {
        let index = client.link_index(&name).await?;
        let addresses = client.link_addresses(index).await?;
        let routes = client.link_routes(index).await?;

        Ok((addresses, routes))
    })
    .await?;

    let mut addresses = Vec::with_capacity(messages.len());
    for message in &messages {
        if let Some(address) = captured_address(message)? {
            addresses.push(address);
        }
    }

    info!(
        "Captured {} addresses and {} routes from '{link_name}'",
        addresses.len(),
        routes.len()
    );

    Ok(LinkState { addresses, routes })
}

/// Moves a link out of `source` into `destination` under a new name. Runs
/// inside `source`: the link is taken down, renamed, re-resolved under the
/// new name (a rename invalidates the previously resolved handle) and moved
/// by namespace descriptor. Partial completion is not rolled back.
pub async fn migrate_link(
    source: &Netns,
    destination: &Netns,
    link_name: &str,
    new_name: &str,
) -> Result<(), MigrationError> {
    let destination_descriptor = destination.clone_descriptor()?;
    let old = link_name.to_owned();
    let new = new_name.to_owned();

    within_namespace(source, move |client| async move {
        let index = client.link_index(&old).await?;
        client.set_down(index).await?;
        client.rename(index, &new).await?;

        let index = client.link_index(&new).await?;
        client.move_to_namespace(index, destination_descriptor.as_raw_fd()).await?;

        Ok(())
    })
    .await?;

    info!(
        "Moved link '{link_name}' out of namespace '{}' as '{new_name}'",
        source.name()
    );

    Ok(())
}

/// Reapplies captured state to the relocated link inside `destination` and
/// brings it up. Route reapplication is carried along but stays disabled
/// unless `apply_routes` is set.
pub async fn configure_link(
    destination: &Netns,
    link_name: &str,
    state: &LinkState,
    apply_routes: bool,
) -> Result<(), MigrationError> {
    let state = state.relabeled(link_name);
    let name = link_name.to_owned();

    within_namespace(destination, move |client| async move {
        let index = client.link_index(&name).await?;

        for address in &state.addresses {
            client
                .add_address(
                    index,
                    address.net.addr(),
                    address.net.prefix_len(),
                    address.label.as_deref(),
                )
                .await?;
        }

        if apply_routes {
            for route in &state.routes {
                client.add_route(route).await?;
            }
        }

        client.set_up(index).await?;

        Ok(())
    })
    .await?;

    info!("Configured link '{link_name}' in namespace '{}'", destination.name());

    Ok(())
}

/// Deletes a link by name in the calling process's current namespace.
pub async fn delete_link(link_name: &str) -> Result<(), MigrationError> {
    let client = RouteClient::new()?;
    let index = client.link_index(link_name).await?;
    client.delete(index).await?;

    info!("Deleted link '{link_name}'");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CapturedAddress, LinkState};

    fn address(net: &str, label: Option<&str>) -> CapturedAddress {
        CapturedAddress {
            net: net.parse().unwrap(),
            label: label.map(str::to_owned),
        }
    }

    #[test]
    fn relabel_rewrites_ipv4_labels_to_the_new_link_name() {
        let state = LinkState {
            addresses: vec![
                address("10.16.4.7/24", Some("net1")),
                address("192.168.30.2/16", None),
                address("fe80::42:acff:fe11:2/64", None),
            ],
            routes: Vec::new(),
        };

        let relabeled = state.relabeled("mlink0");

        assert_eq!(relabeled.addresses.len(), state.addresses.len());
        assert_eq!(relabeled.addresses[0].label.as_deref(), Some("mlink0"));
        assert_eq!(relabeled.addresses[1].label.as_deref(), Some("mlink0"));
        assert_eq!(relabeled.addresses[2].label, None);
    }

    #[test]
    fn relabel_preserves_the_address_set() {
        let state = LinkState {
            addresses: vec![
                address("10.16.4.7/24", Some("net1")),
                address("fe80::42:acff:fe11:2/64", None),
            ],
            routes: Vec::new(),
        };

        let nets: Vec<_> = state.relabeled("mlink3").addresses.iter().map(|a| a.net).collect();

        assert_eq!(nets, vec![state.addresses[0].net, state.addresses[1].net]);
    }
}
