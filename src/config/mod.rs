/*!
 * Plugin Configuration
 * Network configuration from stdin plus the node's subnet file
 */

use crate::core::errors::{CniError, CniResult};
use crate::network::DEFAULT_MTU;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Well-known location of the subnet file
pub const DEFAULT_SUBNET_FILE: &str = "/run/mycni/subnet.json";

/// Overrides `DEFAULT_SUBNET_FILE`
pub const SUBNET_FILE_ENV: &str = "MYCNI_SUBNET_FILE";

pub const DEFAULT_BRIDGE_NAME: &str = "cni0";

pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni/networks";

/// Network configuration passed by the runtime on stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default)]
    pub cni_version: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<Value>,
    #[serde(flatten)]
    pub specific: HashMap<String, Value>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

/// Node-local subnet assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConf {
    pub subnet: String,
    #[serde(default)]
    pub bridge: String,
}

/// Everything one invocation needs
#[derive(Debug, Clone)]
pub struct CniConf {
    pub net: NetConf,
    pub subnet: SubnetConf,
}

impl CniConf {
    pub fn name(&self) -> &str {
        &self.net.name
    }

    pub fn cni_version(&self) -> &str {
        &self.net.cni_version
    }

    pub fn data_dir(&self) -> &Path {
        &self.net.data_dir
    }

    pub fn mtu(&self) -> u32 {
        self.net.mtu
    }

    pub fn subnet(&self) -> &str {
        &self.subnet.subnet
    }

    pub fn bridge(&self) -> &str {
        &self.subnet.bridge
    }
}

/// Path of the subnet file, honouring `MYCNI_SUBNET_FILE`
pub fn subnet_file_path() -> PathBuf {
    std::env::var_os(SUBNET_FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SUBNET_FILE))
}

pub fn parse_net_conf(stdin: &[u8]) -> CniResult<NetConf> {
    let conf: NetConf = serde_json::from_slice(stdin)
        .map_err(|e| CniError::decode("network configuration", e))?;

    if conf.name.is_empty() {
        return Err(CniError::Config("missing network name".to_string()));
    }
    if conf.mtu < 68 {
        return Err(CniError::Config(format!("mtu {} is below the IPv4 minimum", conf.mtu)));
    }
    Ok(conf)
}

pub fn load_subnet_config(path: impl AsRef<Path>) -> CniResult<SubnetConf> {
    let path = path.as_ref();
    let data = fs::read(path)
        .map_err(|e| CniError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let mut conf: SubnetConf = serde_json::from_slice(&data)
        .map_err(|e| CniError::decode(path.display().to_string(), e))?;

    if conf.subnet.trim().is_empty() {
        return Err(CniError::Config(format!("{} has no subnet", path.display())));
    }
    if conf.bridge.is_empty() {
        conf.bridge = DEFAULT_BRIDGE_NAME.to_string();
    }

    debug!(path = %path.display(), subnet = %conf.subnet, bridge = %conf.bridge, "subnet config loaded");
    Ok(conf)
}

pub fn store_subnet_config(path: impl AsRef<Path>, conf: &SubnetConf) -> CniResult<()> {
    let path = path.as_ref();
    let data = serde_json::to_vec(conf).map_err(|e| CniError::Config(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CniError::Config(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    fs::write(path, data)
        .map_err(|e| CniError::Config(format!("failed to write {}: {}", path.display(), e)))
}

/// Parse stdin and merge in the subnet file at `subnet_file`
pub fn load_cni_config(stdin: &[u8], subnet_file: impl AsRef<Path>) -> CniResult<CniConf> {
    let net = parse_net_conf(stdin)?;
    let subnet = load_subnet_config(subnet_file)?;
    Ok(CniConf { net, subnet })
}
