/*!
 * CNI Dispatch Tests
 * Environment parsing, version negotiation, replies and the paths that need no privileges
 */

use mycni::cni::{plugin_main, CmdArgs, Command, Plugin};
use mycni::config::{store_subnet_config, subnet_file_path, SubnetConf, SUBNET_FILE_ENV};
use mycni::ipam::{AllocationStore, IpAllocator};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tempfile::TempDir;

const CNI_VARS: &[&str] = &[
    "CNI_COMMAND",
    "CNI_CONTAINERID",
    "CNI_NETNS",
    "CNI_IFNAME",
    "CNI_ARGS",
    "CNI_PATH",
];

struct Fixture {
    dir: TempDir,
    subnet_file: PathBuf,
}

impl Fixture {
    fn new(subnet: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let subnet_file = dir.path().join("run/mycni/subnet.json");
        store_subnet_config(
            &subnet_file,
            &SubnetConf {
                subnet: subnet.into(),
                bridge: "cni-test0".into(),
            },
        )
        .unwrap();
        Self { dir, subnet_file }
    }

    fn plugin(&self) -> Plugin {
        Plugin::with_subnet_file(&self.subnet_file)
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("networks")
    }

    fn stdin(&self, version: &str) -> Vec<u8> {
        format!(
            r#"{{"cniVersion":"{}","name":"testnet","type":"mycni","dataDir":"{}"}}"#,
            version,
            self.data_dir().display()
        )
        .into_bytes()
    }
}

fn args(command: Command, container_id: &str, netns: &str) -> CmdArgs {
    CmdArgs {
        command,
        container_id: container_id.into(),
        netns: netns.into(),
        if_name: "eth0".into(),
        args: String::new(),
        path: "/opt/cni/bin".into(),
    }
}

fn clear_cni_env() {
    for var in CNI_VARS {
        std::env::remove_var(var);
    }
}

#[tokio::test]
#[serial]
async fn test_version_from_environment() {
    clear_cni_env();
    std::env::set_var("CNI_COMMAND", "VERSION");

    let mut out = Vec::new();
    let status = plugin_main(&Plugin::new(), CmdArgs::from_env(), b"", &mut out).await;
    clear_cni_env();

    assert_eq!(status, 0);
    let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(reply["cniVersion"], "1.0.0");
    assert_eq!(reply["supportedVersions"].as_array().unwrap().len(), 6);
}

#[tokio::test]
#[serial]
async fn test_missing_environment_reported() {
    clear_cni_env();
    std::env::set_var("CNI_COMMAND", "ADD");
    std::env::set_var("CNI_IFNAME", "eth0");

    let mut out = Vec::new();
    let status = plugin_main(&Plugin::new(), CmdArgs::from_env(), b"{}", &mut out).await;
    clear_cni_env();

    assert_eq!(status, 1);
    let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(reply["code"], 4);
    assert!(reply["msg"].as_str().unwrap().contains("CNI_CONTAINERID"));
}

#[test]
#[serial]
fn test_subnet_file_override() {
    std::env::set_var(SUBNET_FILE_ENV, "/tmp/other-subnet.json");
    assert_eq!(subnet_file_path(), PathBuf::from("/tmp/other-subnet.json"));
    std::env::remove_var(SUBNET_FILE_ENV);
    assert_eq!(subnet_file_path(), PathBuf::from("/run/mycni/subnet.json"));
}

#[tokio::test]
async fn test_del_without_netns_releases_address() {
    let fx = Fixture::new("10.22.0.0/24");
    {
        let store = AllocationStore::open(fx.data_dir(), "testnet").unwrap();
        let ipam = IpAllocator::new("10.22.0.0/24", &store).unwrap();
        assert_eq!(ipam.allocate_ip("c1", "eth0").unwrap(), Ipv4Addr::new(10, 22, 0, 2));
    }

    let mut out = Vec::new();
    let status = plugin_main(
        &fx.plugin(),
        Ok(args(Command::Del, "c1", "")),
        &fx.stdin("1.0.0"),
        &mut out,
    )
    .await;
    assert_eq!(status, 0);
    assert!(out.is_empty());

    let store = AllocationStore::open(fx.data_dir(), "testnet").unwrap();
    let ipam = IpAllocator::new("10.22.0.0/24", &store).unwrap();
    assert!(ipam.check_ip("c1").is_err());
}

#[tokio::test]
async fn test_del_is_repeatable_with_stale_netns() {
    let fx = Fixture::new("10.22.0.0/24");
    let gone = fx.dir.path().join("netns/deleted");

    for _ in 0..2 {
        let mut out = Vec::new();
        let status = plugin_main(
            &fx.plugin(),
            Ok(args(Command::Del, "c9", gone.to_str().unwrap())),
            &fx.stdin("0.4.0"),
            &mut out,
        )
        .await;
        assert_eq!(status, 0);
    }
}

#[tokio::test]
async fn test_check_unknown_container() {
    let fx = Fixture::new("10.22.0.0/24");
    let mut out = Vec::new();
    let status = plugin_main(
        &fx.plugin(),
        Ok(args(Command::Check, "nobody", "/proc/self/ns/net")),
        &fx.stdin("1.0.0"),
        &mut out,
    )
    .await;

    assert_eq!(status, 1);
    let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(reply["code"], 3);
    assert_eq!(reply["msg"], "failed to find container nobody ip");
}

#[tokio::test]
async fn test_bad_config_codes() {
    let fx = Fixture::new("10.22.0.0/24");

    let mut out = Vec::new();
    let status = plugin_main(
        &fx.plugin(),
        Ok(args(Command::Del, "c1", "")),
        b"{not json",
        &mut out,
    )
    .await;
    assert_eq!(status, 1);
    let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(reply["code"], 6);

    let missing = Plugin::with_subnet_file(fx.dir.path().join("absent.json"));
    let mut out = Vec::new();
    let status = plugin_main(
        &missing,
        Ok(args(Command::Del, "c1", "")),
        &fx.stdin("1.0.0"),
        &mut out,
    )
    .await;
    assert_eq!(status, 1);
    let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(reply["code"], 7);
}

#[tokio::test]
async fn test_tiny_subnet_rejected() {
    let fx = Fixture::new("10.22.0.0/31");
    let mut out = Vec::new();
    let status = plugin_main(
        &fx.plugin(),
        Ok(args(Command::Del, "c1", "")),
        &fx.stdin("1.0.0"),
        &mut out,
    )
    .await;
    assert_eq!(status, 1);
    let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(reply["code"], 7);
}
