/*!
 * Network Provisioner
 * Bridge / veth / route wiring between the host and container namespaces
 */

use super::bridge;
use super::netlink::{is_errno, Netlink};
use super::netns::NetNs;
use super::types::{Link, VethPair};
use super::veth;
use crate::core::errors::{CniError, CniResult};
use ipnetwork::Ipv4Network;
use nix::errno::Errno;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Provisions container attachments from the host namespace
///
/// Created in the host namespace; keeps a handle to it so veth ends born in a
/// container namespace can be moved back.
pub struct NetworkProvisioner {
    host_ns: NetNs,
    host: Netlink,
}

impl NetworkProvisioner {
    /// Bind to the calling thread's namespace as the host namespace
    pub fn new() -> CniResult<Self> {
        let host_ns = NetNs::current()?;
        let host = Netlink::connect()?;
        Ok(Self { host_ns, host })
    }

    pub fn host_netlink(&self) -> &Netlink {
        &self.host
    }

    /// Ensure the host bridge exists with the gateway address; idempotent by name
    pub async fn create_bridge(
        &self,
        name: &str,
        mtu: u32,
        gateway: Ipv4Network,
    ) -> CniResult<Link> {
        bridge::create_bridge(&self.host, name, mtu, gateway).await
    }

    /// Create a veth pair in the host namespace
    pub async fn create_veth_pair(
        &self,
        container_if_name: &str,
        mtu: u32,
        host_name: Option<&str>,
    ) -> CniResult<VethPair> {
        veth::create_veth_pair(&self.host, container_if_name, mtu, host_name).await
    }

    /// Wire `container_if_name` inside `netns` to `bridge`
    ///
    /// The pair is created inside the container namespace, the host end is
    /// moved out, the container end gets `pod_cidr` and a default route via
    /// `gateway`, and the host end is enslaved to the bridge.
    ///
    /// If `container_if_name` already exists it is reused when it is a veth
    /// carrying `pod_cidr` whose peer is a port of `bridge`; anything else is
    /// a Device error.
    pub async fn setup_veth(
        &self,
        netns: &NetNs,
        bridge: &Link,
        mtu: u32,
        container_if_name: &str,
        pod_cidr: Ipv4Network,
        gateway: Ipv4Addr,
    ) -> CniResult<VethPair> {
        let container = Netlink::connect_in(netns)?;

        if let Some(existing) = container.link_by_name(container_if_name).await? {
            return self
                .existing_pair(&container, existing, bridge, pod_cidr)
                .await;
        }

        let host_name = veth::unique_veth_name(&[&self.host, &container]).await?;
        let pair = veth::add_pair(&container, container_if_name, &host_name, mtu).await?;
        veth::move_to_netns(&container, &pair.host, &self.host_ns).await?;

        container
            .add_address(&pair.container, pod_cidr.ip(), pod_cidr.prefix())
            .await?;
        container.set_up(&pair.container).await?;
        add_default_route(&container, &pair.container, gateway).await?;

        // The index may change when the link crosses namespaces
        let host_end = self.host.require_link(&host_name).await.map_err(|e| {
            CniError::Device(format!("failed to lookup {:?}: {}", host_name, e))
        })?;
        self.host.set_up(&host_end).await?;
        self.host
            .handle()
            .link()
            .set(host_end.index)
            .controller(bridge.index)
            .execute()
            .await
            .map_err(|e| {
                CniError::Device(format!(
                    "failed to connect {:?} to bridge {}: {}",
                    host_name, bridge.name, e
                ))
            })?;

        info!(
            netns = %netns.path().display(),
            container_if = container_if_name,
            host_if = %host_name,
            bridge = %bridge.name,
            ip = %pod_cidr,
            "container attached to bridge"
        );

        let host = self.host.require_link(&host_name).await?;
        Ok(VethPair {
            container: pair.container,
            host,
        })
    }

    async fn existing_pair(
        &self,
        container: &Netlink,
        link: Link,
        bridge: &Link,
        pod_cidr: Ipv4Network,
    ) -> CniResult<VethPair> {
        if !link.is_veth() {
            return Err(CniError::Device(format!(
                "{} already exists in the container but is not a veth (kind {:?})",
                link.name, link.kind
            )));
        }

        let addresses = container.ipv4_addresses(link.index).await?;
        if !addresses.contains(&pod_cidr.ip()) {
            return Err(CniError::Device(format!(
                "{} already exists in the container without {} (has {:?})",
                link.name, pod_cidr, addresses
            )));
        }

        let peer_index = link.peer_index.ok_or_else(|| {
            CniError::Device(format!("{} has no peer link", link.name))
        })?;
        let host = self
            .host
            .link_by_index(peer_index)
            .await?
            .ok_or_else(|| {
                CniError::Device(format!("peer of {} is not in the host namespace", link.name))
            })?;
        if host.master != Some(bridge.index) {
            return Err(CniError::Device(format!(
                "peer {} of {} is not attached to bridge {}",
                host.name, link.name, bridge.name
            )));
        }

        info!(
            container_if = %link.name,
            host_if = %host.name,
            bridge = %bridge.name,
            ip = %pod_cidr,
            "container already attached, reusing"
        );
        Ok(VethPair {
            container: link,
            host,
        })
    }

    /// Verify `if_name` inside `netns` carries `expected`
    pub async fn check_veth(
        &self,
        netns: &NetNs,
        if_name: &str,
        expected: Ipv4Addr,
    ) -> CniResult<()> {
        let container = Netlink::connect_in(netns)?;
        let link = container.require_link(if_name).await?;
        let addresses = container.ipv4_addresses(link.index).await?;

        if addresses.contains(&expected) {
            debug!(if_name, %expected, "container address verified");
            Ok(())
        } else {
            Err(CniError::AddressMismatch {
                interface: if_name.to_string(),
                expected: expected.to_string(),
            })
        }
    }

    /// Delete `if_name` inside `netns`; its host peer and bridge port go with it
    ///
    /// An interface that is already gone is not an error.
    pub async fn del_veth(&self, netns: &NetNs, if_name: &str) -> CniResult<()> {
        let container = Netlink::connect_in(netns)?;
        match container.link_by_name(if_name).await? {
            Some(link) => {
                container.delete_link(&link).await?;
                info!(netns = %netns.path().display(), if_name, "container interface deleted");
            }
            None => debug!(if_name, "interface already removed"),
        }
        Ok(())
    }
}

/// `ip route add default via <gateway> dev <link>`
async fn add_default_route(netlink: &Netlink, link: &Link, gateway: Ipv4Addr) -> CniResult<()> {
    match netlink
        .handle()
        .route()
        .add()
        .v4()
        .gateway(gateway)
        .output_interface(link.index)
        .execute()
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if is_errno(&e, Errno::EEXIST) => {
            debug!(link = %link.name, %gateway, "default route already present");
            Ok(())
        }
        Err(e) => Err(CniError::Device(format!(
            "failed to add default route via {} on {}: {}",
            gateway, link.name, e
        ))),
    }
}
