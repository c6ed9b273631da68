/*!
 * Virtual Ethernet (veth) Pair Management
 * Creates veth pairs and moves their host end across namespaces
 */

use super::netlink::{is_errno, Netlink};
use super::types::{Link, VethPair, VETH_PREFIX};
use crate::core::errors::{CniError, CniResult};
use netlink_packet_route::link::LinkAttribute;
use nix::errno::Errno;
use rand::RngCore;
use std::os::fd::AsRawFd;
use tracing::{debug, info};

/// Give up on random host names after this many collisions
pub const MAX_NAME_ATTEMPTS: usize = 32;

/// Linux IFNAMSIZ minus the trailing NUL
pub const MAX_IFNAME_LEN: usize = 15;

/// `veth` followed by 8 hex digits from 4 random bytes
pub fn random_veth_name() -> String {
    let mut entropy = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut entropy);
    let hex: String = entropy.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", VETH_PREFIX, hex)
}

/// Generate a random host-side name that no link in any of `namespaces` uses
///
/// The name returned is exactly the one that passed the collision check.
pub async fn unique_veth_name(namespaces: &[&Netlink]) -> CniResult<String> {
    'attempt: for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = random_veth_name();
        for netlink in namespaces {
            if netlink.link_by_name(&candidate).await?.is_some() {
                debug!(name = %candidate, "random veth name collides, retrying");
                continue 'attempt;
            }
        }
        return Ok(candidate);
    }

    Err(CniError::Device(format!(
        "could not find a free veth name after {} attempts",
        MAX_NAME_ATTEMPTS
    )))
}

pub fn validate_ifname(name: &str) -> CniResult<()> {
    if name.is_empty()
        || name.len() > MAX_IFNAME_LEN
        || name == "."
        || name == ".."
        || name.contains(|c: char| c == '/' || c == ':' || c.is_whitespace())
    {
        return Err(CniError::Config(format!("invalid interface name {:?}", name)));
    }
    Ok(())
}

/// Create a veth pair with both ends in `netlink`'s namespace
///
/// When `host_name` is `None` a unique random name is generated.
pub async fn create_veth_pair(
    netlink: &Netlink,
    container_if_name: &str,
    mtu: u32,
    host_name: Option<&str>,
) -> CniResult<VethPair> {
    let host_name = match host_name.filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => unique_veth_name(&[netlink]).await?,
    };
    add_pair(netlink, container_if_name, &host_name, mtu).await
}

/// `ip link add <container_if_name> mtu <mtu> type veth peer name <host_name>`
pub(crate) async fn add_pair(
    netlink: &Netlink,
    container_if_name: &str,
    host_name: &str,
    mtu: u32,
) -> CniResult<VethPair> {
    validate_ifname(container_if_name)?;
    validate_ifname(host_name)?;
    if container_if_name == host_name {
        return Err(CniError::Config(format!(
            "veth ends must have different names, both are {}",
            container_if_name
        )));
    }

    info!(
        container_if = container_if_name,
        host_if = host_name,
        mtu,
        "creating veth pair"
    );

    let mut request = netlink
        .handle()
        .link()
        .add()
        .veth(container_if_name.to_string(), host_name.to_string());
    request.message_mut().attributes.push(LinkAttribute::Mtu(mtu));

    request.execute().await.map_err(|e| {
        if is_errno(&e, Errno::EEXIST) {
            CniError::Device(format!(
                "container veth name provided ({}) already exists",
                container_if_name
            ))
        } else {
            CniError::Device(format!(
                "failed to create veth pair {}<->{}: {}",
                container_if_name, host_name, e
            ))
        }
    })?;

    let container = netlink.require_link(container_if_name).await?;
    let peer = netlink.require_link(host_name).await?;

    // The peer is created with the kernel default MTU
    netlink
        .handle()
        .link()
        .set(peer.index)
        .mtu(mtu)
        .execute()
        .await
        .map_err(|e| CniError::Device(format!("failed to set MTU on {}: {}", host_name, e)))?;
    let host = netlink.require_link(host_name).await?;

    debug!(container = container.index, host = host.index, "veth pair created");
    Ok(VethPair { container, host })
}

/// Move `link` into the namespace referred to by `target`
pub(crate) async fn move_to_netns(
    netlink: &Netlink,
    link: &Link,
    target: &impl AsRawFd,
) -> CniResult<()> {
    netlink
        .handle()
        .link()
        .set(link.index)
        .setns_by_fd(target.as_raw_fd())
        .execute()
        .await
        .map_err(|e| {
            CniError::Device(format!("failed to move {} to host netns: {}", link.name, e))
        })
}
