/*!
 * Network Topology Module
 * Host bridge, veth pairs and namespace attachment over rtnetlink
 */

mod bridge;
mod netlink;
mod netns;
mod provisioner;
mod types;
mod veth;

pub use bridge::create_bridge;
pub use netlink::{is_errno, Netlink};
pub use netns::{NetNs, NetNsGuard, CURRENT_THREAD_NETNS};
pub use provisioner::NetworkProvisioner;
pub use types::*;
pub use veth::{create_veth_pair, random_veth_name, unique_veth_name, validate_ifname};
