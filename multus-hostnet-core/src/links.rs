use std::net::IpAddr;
use std::os::fd::RawFd;

use futures::TryStreamExt;
use netlink_packet_route::{
    address::{AddressAttribute, AddressMessage},
    link::{LinkAttribute, LinkMessage},
    route::{RouteAddress, RouteAttribute, RouteMessage},
    AddressFamily,
};
use nix::libc::ENODEV;
use regex::Regex;
use rtnetlink::{Handle, IpVersion};
use thiserror::Error;
use tokio::runtime::Handle as RuntimeHandle;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("No tokio runtime is available on this thread!")]
    NoRuntime,
    #[error("Couldn't open a netlink socket! Reason: {}", .0)]
    Socket(std::io::Error),
    #[error("'{}' link was not found!", .0)]
    LinkNotFound(String),
    #[error("Netlink request failed! Reason: {}", .0)]
    Netlink(rtnetlink::Error),
    #[error("Couldn't build the link name pattern! Reason: {}", .0)]
    NamePattern(regex::Error),
}

/// A link together with the addresses currently assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub index: u32,
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

/// Returns the name of the interface carrying `address`, or `None` when no
/// interface does. Callers must treat `None` as an expected outcome, not a
/// failure.
pub fn find_interface<'a>(interfaces: &'a [InterfaceInfo], address: &IpAddr) -> Option<&'a str> {
    interfaces
        .iter()
        .find(|interface| interface.addresses.contains(address))
        .map(|interface| interface.name.as_str())
}

/// Picks the next free `{prefix}<n>` link name: one past the highest suffix
/// currently in use, `{prefix}0` when no such link exists. Names that don't
/// follow the prefix + integer convention are ignored.
pub fn determine_new_link_name<'a>(
    names: impl IntoIterator<Item = &'a str>,
    prefix: &str,
) -> Result<String, LinkError> {
    let pattern = Regex::new(&format!("^{}([0-9]+)$", regex::escape(prefix)))
        .map_err(LinkError::NamePattern)?;

    let mut highest: Option<u32> = None;
    for name in names {
        if let Some(captures) = pattern.captures(name) {
            if let Ok(id) = captures[1].parse::<u32>() {
                highest = Some(highest.map_or(id, |current| current.max(id)));
            }
        }
    }

    let next = highest.map_or(0, |highest| highest + 1);

    Ok(format!("{prefix}{next}"))
}

/// Thin client over an rtnetlink route socket. The socket is bound to
/// whichever network namespace the constructing thread is a member of.
pub struct RouteClient {
    handle: Handle,
}

impl RouteClient {
    pub fn new() -> Result<Self, LinkError> {
        let runtime = RuntimeHandle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let (connection, handle, _) = rtnetlink::new_connection().map_err(LinkError::Socket)?;
        runtime.spawn(connection);

        Ok(Self { handle })
    }

    /// Enumerates every link in the current namespace along with its
    /// assigned addresses.
    pub async fn interfaces(&self) -> Result<Vec<InterfaceInfo>, LinkError> {
        let links: Vec<LinkMessage> = self
            .handle
            .link()
            .get()
            .execute()
            .try_collect()
            .await
            .map_err(LinkError::Netlink)?;

        let mut interfaces = Vec::with_capacity(links.len());
        for link in &links {
            let Some(name) = link_name(link) else {
                continue;
            };
            let index = link.header.index;
            let addresses = self
                .link_addresses(index)
                .await?
                .iter()
                .filter_map(address_ip)
                .collect();

            interfaces.push(InterfaceInfo { index, name, addresses });
        }

        Ok(interfaces)
    }

    /// Resolves a link name to its kernel index, with absence reported as
    /// the distinct [`LinkError::LinkNotFound`].
    pub async fn link_index(&self, name: &str) -> Result<u32, LinkError> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_owned())
            .execute();

        match links.try_next().await {
            Ok(Some(link)) => Ok(link.header.index),
            Ok(None) => Err(LinkError::LinkNotFound(name.to_owned())),
            Err(rtnetlink::Error::NetlinkError(message)) if message.raw_code() == -ENODEV => {
                Err(LinkError::LinkNotFound(name.to_owned()))
            }
            Err(error) => Err(LinkError::Netlink(error)),
        }
    }

    pub async fn link_addresses(&self, index: u32) -> Result<Vec<AddressMessage>, LinkError> {
        self.handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute()
            .try_collect()
            .await
            .map_err(LinkError::Netlink)
    }

    pub async fn link_routes(&self, index: u32) -> Result<Vec<RouteMessage>, LinkError> {
        let mut routes = Vec::new();
        for ip_version in [IpVersion::V4, IpVersion::V6] {
            let family: Vec<RouteMessage> = self
                .handle
                .route()
                .get(ip_version)
                .execute()
                .try_collect()
                .await
                .map_err(LinkError::Netlink)?;

            routes.extend(
                family
                    .into_iter()
                    .filter(|route| route_output_interface(route) == Some(index)),
            );
        }

        Ok(routes)
    }

    pub async fn set_down(&self, index: u32) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(index)
            .down()
            .execute()
            .await
            .map_err(LinkError::Netlink)
    }

    pub async fn set_up(&self, index: u32) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(LinkError::Netlink)
    }

    pub async fn rename(&self, index: u32, name: &str) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(index)
            .name(name.to_owned())
            .execute()
            .await
            .map_err(LinkError::Netlink)
    }

    /// Moves a link into the namespace behind `descriptor`.
    pub async fn move_to_namespace(&self, index: u32, descriptor: RawFd) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(index)
            .setns_by_fd(descriptor)
            .execute()
            .await
            .map_err(LinkError::Netlink)
    }

    pub async fn delete(&self, index: u32) -> Result<(), LinkError> {
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(LinkError::Netlink)
    }

    /// Adds an address to a link. The label, when set, must match the owning
    /// interface's name for the kernel to accept the request.
    pub async fn add_address(
        &self,
        index: u32,
        address: IpAddr,
        prefix_len: u8,
        label: Option<&str>,
    ) -> Result<(), LinkError> {
        let mut request = self.handle.address().add(index, address, prefix_len);
        if let Some(label) = label {
            request
                .message_mut()
                .attributes
                .push(AddressAttribute::Label(label.to_owned()));
        }

        request.execute().await.map_err(LinkError::Netlink)
    }

    /// Reapplies a previously captured route.
    pub async fn add_route(&self, route: &RouteMessage) -> Result<(), LinkError> {
        match route.header.address_family {
            AddressFamily::Inet => {
                let mut request = self.handle.route().add().v4();
                if let Some((IpAddr::V4(destination), prefix_len)) = route_destination(route) {
                    request = request.destination_prefix(destination, prefix_len);
                }
                if let Some(IpAddr::V4(gateway)) = route_gateway(route) {
                    request = request.gateway(gateway);
                }
                if let Some(index) = route_output_interface(route) {
                    request = request.output_interface(index);
                }
                request.execute().await.map_err(LinkError::Netlink)
            }
            AddressFamily::Inet6 => {
                let mut request = self.handle.route().add().v6();
                if let Some((IpAddr::V6(destination), prefix_len)) = route_destination(route) {
                    request = request.destination_prefix(destination, prefix_len);
                }
                if let Some(IpAddr::V6(gateway)) = route_gateway(route) {
                    request = request.gateway(gateway);
                }
                if let Some(index) = route_output_interface(route) {
                    request = request.output_interface(index);
                }
                request.execute().await.map_err(LinkError::Netlink)
            }
            _ => Ok(()),
        }
    }
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attribute| match attribute {
        LinkAttribute::IfName(name) => Some(name.to_owned()),
        _ => None,
    })
}

/// The address an `AddressMessage` stands for: the local address when the
/// kernel reports one, the plain address attribute otherwise.
pub fn address_ip(message: &AddressMessage) -> Option<IpAddr> {
    let mut address = None;
    for attribute in &message.attributes {
        match attribute {
            AddressAttribute::Local(ip) => return Some(*ip),
            AddressAttribute::Address(ip) => address = Some(*ip),
            _ => {}
        }
    }

    address
}

pub fn address_label(message: &AddressMessage) -> Option<&str> {
    message.attributes.iter().find_map(|attribute| match attribute {
        AddressAttribute::Label(label) => Some(label.as_str()),
        _ => None,
    })
}

fn route_output_interface(route: &RouteMessage) -> Option<u32> {
    route.attributes.iter().find_map(|attribute| match attribute {
        RouteAttribute::Oif(index) => Some(*index),
        _ => None,
    })
}

fn route_destination(route: &RouteMessage) -> Option<(IpAddr, u8)> {
    route.attributes.iter().find_map(|attribute| match attribute {
        RouteAttribute::Destination(RouteAddress::Inet(address)) => {
            Some((IpAddr::V4(*address), route.header.destination_prefix_length))
        }
        RouteAttribute::Destination(RouteAddress::Inet6(address)) => {
            Some((IpAddr::V6(*address), route.header.destination_prefix_length))
        }
        _ => None,
    })
}

fn route_gateway(route: &RouteMessage) -> Option<IpAddr> {
    route.attributes.iter().find_map(|attribute| match attribute {
        RouteAttribute::Gateway(RouteAddress::Inet(address)) => Some(IpAddr::V4(*address)),
        RouteAttribute::Gateway(RouteAddress::Inet6(address)) => Some(IpAddr::V6(*address)),
        _ => None,
    })
}
