/*!
 * Netlink Connection
 * rtnetlink handle bound to one network namespace, plus link/address lookups
 */

use super::netns::NetNs;
use super::types::Link;
use crate::core::errors::{CniError, CniResult};
use futures::stream::TryStreamExt;
use netlink_packet_route::address::AddressAttribute;
use nix::errno::Errno;
use rtnetlink::{new_connection, Handle};
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Netlink route socket for the namespace it was opened in
///
/// Requests on the handle act on the namespace the socket was created in,
/// whatever namespace the calling thread is in later.
#[derive(Clone)]
pub struct Netlink {
    handle: Handle,
}

impl Netlink {
    /// Open a connection in the calling thread's current namespace
    ///
    /// Must be called from within a tokio runtime; the connection task is spawned on it.
    pub fn connect() -> CniResult<Self> {
        let (connection, handle, _) = new_connection().map_err(|e| {
            CniError::Device(format!("failed to create netlink connection: {}", e))
        })?;

        // Spawn the connection in the background
        tokio::spawn(connection);

        Ok(Self { handle })
    }

    /// Open a connection whose socket lives inside `netns`
    pub fn connect_in(netns: &NetNs) -> CniResult<Self> {
        let netlink = netns.run(Self::connect)?;
        debug!(netns = %netns.path().display(), "netlink connection opened in namespace");
        Ok(netlink)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Look a link up by name; a missing device is `Ok(None)`
    pub async fn link_by_name(&self, name: &str) -> CniResult<Option<Link>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match links.try_next().await {
            Ok(found) => Ok(found.map(|msg| Link::from_message(&msg))),
            Err(e) if is_errno(&e, Errno::ENODEV) => Ok(None),
            Err(e) => Err(CniError::Device(format!(
                "failed to find link {}: {}",
                name, e
            ))),
        }
    }

    /// Look a link up by index; a missing device is `Ok(None)`
    pub async fn link_by_index(&self, index: u32) -> CniResult<Option<Link>> {
        let mut links = self.handle.link().get().match_index(index).execute();

        match links.try_next().await {
            Ok(found) => Ok(found.map(|msg| Link::from_message(&msg))),
            Err(e) if is_errno(&e, Errno::ENODEV) => Ok(None),
            Err(e) => Err(CniError::Device(format!(
                "failed to find link #{}: {}",
                index, e
            ))),
        }
    }

    /// Like `link_by_name` but a missing device is an error
    pub async fn require_link(&self, name: &str) -> CniResult<Link> {
        self.link_by_name(name)
            .await?
            .ok_or_else(|| CniError::Device(format!("Link not found: {}", name)))
    }

    /// IPv4 addresses assigned to the link with `index`
    pub async fn ipv4_addresses(&self, index: u32) -> CniResult<Vec<Ipv4Addr>> {
        let mut addresses = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();

        let mut found = Vec::new();
        while let Some(msg) = addresses.try_next().await.map_err(|e| {
            CniError::Device(format!("failed to list addresses of link {}: {}", index, e))
        })? {
            for attr in &msg.attributes {
                if let AddressAttribute::Address(IpAddr::V4(addr)) = attr {
                    found.push(*addr);
                }
            }
        }
        Ok(found)
    }

    /// Assign `addr/prefix_len`; an address that is already present is success
    pub async fn add_address(&self, link: &Link, addr: Ipv4Addr, prefix_len: u8) -> CniResult<()> {
        match self
            .handle
            .address()
            .add(link.index, IpAddr::V4(addr), prefix_len)
            .execute()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_errno(&e, Errno::EEXIST) => {
                debug!(link = %link.name, %addr, "address already assigned");
                Ok(())
            }
            Err(e) => Err(CniError::Device(format!(
                "failed to add IP addr {}/{} to {}: {}",
                addr, prefix_len, link.name, e
            ))),
        }
    }

    pub async fn set_up(&self, link: &Link) -> CniResult<()> {
        self.handle
            .link()
            .set(link.index)
            .up()
            .execute()
            .await
            .map_err(|e| CniError::Device(format!("failed to set {} up: {}", link.name, e)))
    }

    pub async fn delete_link(&self, link: &Link) -> CniResult<()> {
        self.handle
            .link()
            .del(link.index)
            .execute()
            .await
            .map_err(|e| CniError::Device(format!("failed to delete {}: {}", link.name, e)))
    }
}

/// Whether a netlink failure carries `errno`
pub fn is_errno(err: &rtnetlink::Error, errno: Errno) -> bool {
    match err {
        rtnetlink::Error::NetlinkError(msg) => msg
            .code
            .map(|code| code.get().abs() == errno as i32)
            .unwrap_or(false),
        _ => false,
    }
}
