/*!
 * CNI Dispatcher
 * Routes ADD / CHECK / DEL / VERSION to the allocator and provisioner and
 * writes the reply the runtime expects on stdout
 */

use super::args::{CmdArgs, Command};
use super::result::{AddResult, ErrorEnvelope, Interface};
use super::version::{check_supported, config_version, version_at_least, VersionInfo};
use crate::config::{load_cni_config, subnet_file_path};
use crate::core::errors::{CniError, CniResult};
use crate::ipam::{AllocationStore, IpAllocator};
use crate::network::{NetNs, NetworkProvisioner};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, info_span, Instrument};

/// CNI_ARGS keys set by the kubelet
const POD_NAME_ARG: &str = "K8S_POD_NAME";
const POD_NAMESPACE_ARG: &str = "K8S_POD_NAMESPACE";

/// Lowest version that defines CHECK
const CHECK_MIN_VERSION: &str = "0.4.0";

/// One plugin invocation context
#[derive(Debug, Clone)]
pub struct Plugin {
    subnet_file: PathBuf,
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin {
    /// Uses the subnet file from the environment or the well-known path
    pub fn new() -> Self {
        Self::with_subnet_file(subnet_file_path())
    }

    pub fn with_subnet_file(subnet_file: impl Into<PathBuf>) -> Self {
        Self {
            subnet_file: subnet_file.into(),
        }
    }

    pub fn subnet_file(&self) -> &Path {
        &self.subnet_file
    }

    /// Execute `args.command` and return what belongs on stdout
    pub async fn run(&self, args: &CmdArgs, stdin: &[u8]) -> CniResult<String> {
        if args.command == Command::Version {
            let info = serde_json::to_string(&VersionInfo::current())
                .map_err(|e| CniError::Storage(e.to_string()))?;
            return Ok(format!("{}\n", info));
        }

        let version = config_version(stdin)?;
        check_supported(&version)?;

        match args.command {
            Command::Add => self.cmd_add(args, stdin, &version).await,
            Command::Check => self.cmd_check(args, stdin, &version).await.map(|()| String::new()),
            Command::Del => self.cmd_del(args, stdin).await.map(|()| String::new()),
            Command::Version => Ok(String::new()),
        }
    }

    /// Allocate an address and attach the container to the node bridge
    pub async fn cmd_add(&self, args: &CmdArgs, stdin: &[u8], version: &str) -> CniResult<String> {
        let conf = load_cni_config(stdin, &self.subnet_file)?;
        let store = AllocationStore::open(conf.data_dir(), conf.name())?;
        let ipam = IpAllocator::new(conf.subnet(), &store)?;

        let gateway = ipam.gateway();
        let ip = ipam.allocate_ip(&args.container_id, &args.if_name)?;

        let provisioner = NetworkProvisioner::new()?;
        let bridge = provisioner
            .create_bridge(conf.bridge(), conf.mtu(), ipam.ip_net(gateway))
            .await?;

        let netns = NetNs::open(&args.netns)?;
        let pair = provisioner
            .setup_veth(
                &netns,
                &bridge,
                conf.mtu(),
                &args.if_name,
                ipam.ip_net(ip),
                gateway,
            )
            .await?;

        info!(container_id = %args.container_id, %ip, bridge = %bridge.name, "container added");

        let result = AddResult::new(ipam.ip_net(ip), gateway).with_interfaces(
            vec![
                Interface::host(&bridge.name),
                Interface::host(&pair.host.name),
                Interface::sandboxed(&args.if_name, &args.netns),
            ],
            2,
        );
        netns.close();
        store.close();

        result.render(version)
    }

    /// Verify the recorded address is still configured in the container
    pub async fn cmd_check(&self, args: &CmdArgs, stdin: &[u8], version: &str) -> CniResult<()> {
        if !version_at_least(version, CHECK_MIN_VERSION)? {
            return Err(CniError::IncompatibleVersion(format!(
                "config version {:?} does not allow CHECK",
                version
            )));
        }

        let conf = load_cni_config(stdin, &self.subnet_file)?;
        let store = AllocationStore::open(conf.data_dir(), conf.name())?;
        let ipam = IpAllocator::new(conf.subnet(), &store)?;
        let ip = ipam.check_ip(&args.container_id)?;

        store.close();

        let netns = NetNs::open(&args.netns)?;
        NetworkProvisioner::new()?
            .check_veth(&netns, &args.if_name, ip)
            .await?;
        netns.close();
        Ok(())
    }

    /// Release the address, then remove the container interface if the namespace remains
    pub async fn cmd_del(&self, args: &CmdArgs, stdin: &[u8]) -> CniResult<()> {
        let conf = load_cni_config(stdin, &self.subnet_file)?;
        let store = AllocationStore::open(conf.data_dir(), conf.name())?;
        let ipam = IpAllocator::new(conf.subnet(), &store)?;
        ipam.release_ip(&args.container_id)?;
        store.close();

        if args.netns.is_empty() || !Path::new(&args.netns).exists() {
            debug!(container_id = %args.container_id, netns = %args.netns, "namespace gone, nothing to detach");
            return Ok(());
        }

        let netns = NetNs::open(&args.netns)?;
        NetworkProvisioner::new()?
            .del_veth(&netns, &args.if_name)
            .await?;
        netns.close();

        info!(container_id = %args.container_id, "container deleted");
        Ok(())
    }
}

/// Run one invocation end to end and return the process exit status
///
/// `args` is taken as a result so environment errors get the same envelope as
/// everything else.
pub async fn plugin_main<W: Write>(
    plugin: &Plugin,
    args: CniResult<CmdArgs>,
    stdin: &[u8],
    out: &mut W,
) -> i32 {
    let outcome = match args {
        Ok(args) => {
            let span = info_span!(
                "cni",
                command = %args.command,
                container_id = %args.container_id,
                if_name = %args.if_name,
                pod = args.cni_arg(POD_NAME_ARG).unwrap_or_default(),
                pod_namespace = args.cni_arg(POD_NAMESPACE_ARG).unwrap_or_default()
            );
            plugin.run(&args, stdin).instrument(span).await
        }
        Err(e) => Err(e),
    };

    let (reply, status) = match outcome {
        Ok(reply) => (reply, 0),
        Err(e) => {
            error!(code = e.code(), error = %e, "invocation failed");
            match ErrorEnvelope::from(&e).render() {
                Ok(envelope) => (envelope, 1),
                Err(render_err) => {
                    error!(error = %render_err, "failed to encode error reply");
                    return 1;
                }
            }
        }
    };

    if let Err(e) = out.write_all(reply.as_bytes()).and_then(|()| out.flush()) {
        error!(error = %e, "failed to write reply");
        return 1;
    }
    status
}
