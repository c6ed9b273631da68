/*!
 * mycni Library
 * Single-node bridge CNI plugin: IPAM, host bridge and veth wiring, CNI dispatch
 */

#[cfg(not(target_os = "linux"))]
compile_error!("mycni manages Linux network namespaces and only builds on Linux");

pub mod cni;
pub mod config;
pub mod core;
pub mod ipam;
pub mod monitoring;
pub mod network;

// Re-exports
pub use crate::cni::{plugin_main, CmdArgs, Command, Plugin};
pub use config::{load_cni_config, CniConf, NetConf, SubnetConf};
pub use crate::core::errors::{CniError, CniResult};
pub use ipam::{AllocationStore, IpAllocator};
pub use monitoring::init_tracing;
pub use network::{NetNs, NetworkProvisioner};
