/*!
 * CNI Results
 * Success results rendered per requested CNI version, and the error envelope
 */

use super::version::parse_version;
use crate::core::errors::{CniError, CniResult};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::net::Ipv4Addr;

/// Interface reported in a result; `sandbox` is set for the container side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

impl Interface {
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sandbox: String::new(),
        }
    }

    pub fn sandboxed(name: impl Into<String>, sandbox: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sandbox: sandbox.into(),
        }
    }
}

/// Outcome of a successful ADD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResult {
    /// Container address with the subnet prefix
    pub ip: Ipv4Network,
    pub gateway: Ipv4Addr,
    pub interfaces: Vec<Interface>,
    /// Index into `interfaces` of the interface carrying `ip`
    pub ip_interface: Option<usize>,
}

impl AddResult {
    pub fn new(ip: Ipv4Network, gateway: Ipv4Addr) -> Self {
        Self {
            ip,
            gateway,
            interfaces: Vec::new(),
            ip_interface: None,
        }
    }

    pub fn with_interfaces(mut self, interfaces: Vec<Interface>, ip_interface: usize) -> Self {
        self.interfaces = interfaces;
        self.ip_interface = Some(ip_interface);
        self
    }

    /// Render for `cni_version` with four-space indentation
    pub fn render(&self, cni_version: &str) -> CniResult<String> {
        let routes = vec![Route {
            dst: DEFAULT_ROUTE,
            gw: self.gateway,
        }];

        match parse_version(cni_version)? {
            (0, 1, _) | (0, 2, _) => to_pretty(&LegacyResult {
                cni_version,
                ip4: LegacyIp {
                    ip: self.ip,
                    gateway: self.gateway,
                    routes,
                },
                dns: Dns {},
            }),
            (0, 3, _) | (0, 4, _) => to_pretty(&VersionedResult {
                cni_version,
                interfaces: &self.interfaces,
                ips: vec![VersionedIp {
                    version: "4",
                    interface: self.ip_interface,
                    address: self.ip,
                    gateway: self.gateway,
                }],
                routes,
                dns: Dns {},
            }),
            (1, 0, _) => to_pretty(&CurrentResult {
                cni_version,
                interfaces: &self.interfaces,
                ips: vec![CurrentIp {
                    interface: self.ip_interface,
                    address: self.ip,
                    gateway: self.gateway,
                }],
                routes,
                dns: Dns {},
            }),
            _ => Err(CniError::IncompatibleVersion(format!(
                "cannot render a result for version {:?}",
                cni_version
            ))),
        }
    }
}

#[derive(Serialize)]
struct Dns {}

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

#[derive(Serialize)]
struct Route {
    dst: &'static str,
    gw: Ipv4Addr,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LegacyResult<'a> {
    cni_version: &'a str,
    ip4: LegacyIp,
    dns: Dns,
}

#[derive(Serialize)]
struct LegacyIp {
    #[serde(serialize_with = "serialize_net")]
    ip: Ipv4Network,
    gateway: Ipv4Addr,
    routes: Vec<Route>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionedResult<'a> {
    cni_version: &'a str,
    #[serde(skip_serializing_if = "no_interfaces")]
    interfaces: &'a [Interface],
    ips: Vec<VersionedIp>,
    routes: Vec<Route>,
    dns: Dns,
}

#[derive(Serialize)]
struct VersionedIp {
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    interface: Option<usize>,
    #[serde(serialize_with = "serialize_net")]
    address: Ipv4Network,
    gateway: Ipv4Addr,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentResult<'a> {
    cni_version: &'a str,
    #[serde(skip_serializing_if = "no_interfaces")]
    interfaces: &'a [Interface],
    ips: Vec<CurrentIp>,
    routes: Vec<Route>,
    dns: Dns,
}

#[derive(Serialize)]
struct CurrentIp {
    #[serde(skip_serializing_if = "Option::is_none")]
    interface: Option<usize>,
    #[serde(serialize_with = "serialize_net")]
    address: Ipv4Network,
    gateway: Ipv4Addr,
}

fn no_interfaces(list: &&[Interface]) -> bool {
    list.is_empty()
}

fn serialize_net<S: serde::Serializer>(net: &Ipv4Network, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(net)
}

/// Error reply written to stdout on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorEnvelope {
    pub fn render(&self) -> CniResult<String> {
        to_pretty(self)
    }
}

impl From<&CniError> for ErrorEnvelope {
    fn from(err: &CniError) -> Self {
        let details = match err {
            CniError::Decode { reason, .. } => reason.clone(),
            _ => String::new(),
        };
        Self {
            code: err.code(),
            msg: err.to_string(),
            details,
        }
    }
}

fn to_pretty<T: Serialize>(value: &T) -> CniResult<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| CniError::Storage(format!("failed to encode result: {}", e)))?;
    String::from_utf8(buf).map_err(|e| CniError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> AddResult {
        AddResult::new("10.244.0.2/24".parse().unwrap(), Ipv4Addr::new(10, 244, 0, 1))
    }

    #[test]
    fn test_render_current() {
        let out = sample()
            .with_interfaces(
                vec![
                    Interface::host("cni0"),
                    Interface::host("veth0a1b2c3d"),
                    Interface::sandboxed("eth0", "/var/run/netns/abc"),
                ],
                2,
            )
            .render("1.0.0")
            .unwrap();

        let expected = r#"{
    "cniVersion": "1.0.0",
    "interfaces": [
        {
            "name": "cni0"
        },
        {
            "name": "veth0a1b2c3d"
        },
        {
            "name": "eth0",
            "sandbox": "/var/run/netns/abc"
        }
    ],
    "ips": [
        {
            "interface": 2,
            "address": "10.244.0.2/24",
            "gateway": "10.244.0.1"
        }
    ],
    "routes": [
        {
            "dst": "0.0.0.0/0",
            "gw": "10.244.0.1"
        }
    ],
    "dns": {}
}"#;
        assert_eq!(out, expected);
    }

    #[test]
    fn test_render_040_tags_ip_version() {
        let out = sample().render("0.4.0").unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["cniVersion"], "0.4.0");
        assert_eq!(value["ips"][0]["version"], "4");
        assert_eq!(value["ips"][0]["address"], "10.244.0.2/24");
        assert!(value.get("interfaces").is_none());
    }

    #[test]
    fn test_render_legacy() {
        let out = sample().render("0.2.0").unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["ip4"]["ip"], "10.244.0.2/24");
        assert_eq!(value["ip4"]["gateway"], "10.244.0.1");
        assert!(value.get("ips").is_none());
    }

    #[test]
    fn test_render_unknown_version() {
        assert!(sample().render("2.0.0").is_err());
    }

    #[test]
    fn test_error_envelope() {
        let err = CniError::NotFound("abc".into());
        let out = ErrorEnvelope::from(&err).render().unwrap();
        assert_eq!(
            out,
            "{\n    \"code\": 3,\n    \"msg\": \"failed to find container abc ip\"\n}"
        );

        let err = CniError::Device("link \"eth0\"\n\u{1b}gone".into());
        let rendered = ErrorEnvelope::from(&err).render().unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["msg"], "device error: link \"eth0\"\n\u{1b}gone");

        let err = CniError::decode("network configuration", "EOF while parsing");
        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.code, 6);
        assert_eq!(envelope.details, "EOF while parsing");
    }
}
