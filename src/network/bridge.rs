/*!
 * Linux Network Bridge
 * Idempotent creation and verification of the host bridge
 */

use super::netlink::{is_errno, Netlink};
use super::types::Link;
use crate::core::errors::{CniError, CniResult};
use ipnetwork::Ipv4Network;
use netlink_packet_route::link::LinkAttribute;
use nix::errno::Errno;
use tracing::{debug, info};

/// Ensure bridge `name` exists, carries `gateway` and is up
///
/// An existing link is reused only if it is a bridge whose IPv4 addresses
/// include the gateway. A bridge with no IPv4 address at all is treated as
/// half-configured by a concurrent invocation and finished here.
pub async fn create_bridge(
    netlink: &Netlink,
    name: &str,
    mtu: u32,
    gateway: Ipv4Network,
) -> CniResult<Link> {
    if let Some(existing) = netlink.link_by_name(name).await? {
        debug!(bridge = name, index = existing.index, "bridge already exists");
        return ensure_bridge(netlink, existing, gateway).await;
    }

    info!(bridge = name, mtu, gateway = %gateway, "creating network bridge");

    let mut request = netlink.handle().link().add().bridge(name.to_string());
    request.message_mut().attributes.push(LinkAttribute::Mtu(mtu));
    match request.execute().await {
        Ok(()) => {}
        Err(e) if is_errno(&e, Errno::EEXIST) => {
            debug!(bridge = name, "bridge created concurrently");
        }
        Err(e) => {
            return Err(CniError::Device(format!(
                "failed to create bridge {}: {}",
                name, e
            )))
        }
    }

    // Re-read in case a concurrent invocation won the race
    let bridge = netlink.require_link(name).await?;
    ensure_bridge(netlink, bridge, gateway).await
}

async fn ensure_bridge(netlink: &Netlink, link: Link, gateway: Ipv4Network) -> CniResult<Link> {
    if !link.is_bridge() {
        return Err(CniError::Device(format!(
            "{} already exists but is not a bridge (kind {:?})",
            link.name, link.kind
        )));
    }

    let addresses = netlink.ipv4_addresses(link.index).await?;
    if !addresses.contains(&gateway.ip()) {
        if !addresses.is_empty() {
            return Err(CniError::Device(format!(
                "bridge {} carries {:?}, expected gateway {}",
                link.name,
                addresses,
                gateway.ip()
            )));
        }
        netlink
            .add_address(&link, gateway.ip(), gateway.prefix())
            .await?;
    }

    netlink.set_up(&link).await?;
    debug!(bridge = %link.name, index = link.index, "bridge ready");
    Ok(link)
}
