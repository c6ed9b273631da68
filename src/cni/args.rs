/*!
 * CNI Invocation Arguments
 * The CNI_* environment handed to the plugin by the runtime
 */

use crate::core::errors::{CniError, CniResult};
use std::fmt;
use std::str::FromStr;

/// CNI verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Add,
    Check,
    Del,
    Version,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Add => "ADD",
            Command::Check => "CHECK",
            Command::Del => "DEL",
            Command::Version => "VERSION",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CniError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Command::Add),
            "CHECK" => Ok(Command::Check),
            "DEL" => Ok(Command::Del),
            "VERSION" => Ok(Command::Version),
            other => Err(CniError::InvalidEnvironment(format!(
                "unknown CNI_COMMAND: {}",
                other
            ))),
        }
    }
}

/// Arguments for one plugin invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdArgs {
    pub command: Command,
    pub container_id: String,
    pub netns: String,
    pub if_name: String,
    pub args: String,
    pub path: String,
}

impl CmdArgs {
    pub fn from_env() -> CniResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; missing required variables are reported together
    pub fn from_lookup<F>(lookup: F) -> CniResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();

        let raw_command = get("CNI_COMMAND");
        if raw_command.is_empty() {
            return Err(missing(&["CNI_COMMAND"]));
        }
        let command: Command = raw_command.parse()?;

        let args = CmdArgs {
            command,
            container_id: get("CNI_CONTAINERID"),
            netns: get("CNI_NETNS"),
            if_name: get("CNI_IFNAME"),
            args: get("CNI_ARGS"),
            path: get("CNI_PATH"),
        };

        let required: Vec<(&str, &str)> = match command {
            Command::Version => Vec::new(),
            Command::Add | Command::Check => vec![
                ("CNI_CONTAINERID", args.container_id.as_str()),
                ("CNI_NETNS", args.netns.as_str()),
                ("CNI_IFNAME", args.if_name.as_str()),
                ("CNI_PATH", args.path.as_str()),
            ],
            Command::Del => vec![
                ("CNI_CONTAINERID", args.container_id.as_str()),
                ("CNI_IFNAME", args.if_name.as_str()),
                ("CNI_PATH", args.path.as_str()),
            ],
        };

        let absent: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !absent.is_empty() {
            return Err(missing(&absent));
        }

        Ok(args)
    }

    /// `K=V;K2=V2` pairs from CNI_ARGS
    pub fn cni_args(&self) -> Vec<(&str, &str)> {
        self.args
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .collect()
    }

    /// Value of `key` in CNI_ARGS
    pub fn cni_arg(&self, key: &str) -> Option<&str> {
        self.cni_args()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

fn missing(keys: &[&str]) -> CniError {
    CniError::InvalidEnvironment(format!(
        "required env variables [{}] missing",
        keys.join(",")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_add_args() {
        let args = CmdArgs::from_lookup(lookup(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "abc123"),
            ("CNI_NETNS", "/var/run/netns/abc"),
            ("CNI_IFNAME", "eth0"),
            ("CNI_PATH", "/opt/cni/bin"),
            ("CNI_ARGS", "K8S_POD_NAME=web;K8S_POD_NAMESPACE=default"),
        ]))
        .unwrap();

        assert_eq!(args.command, Command::Add);
        assert_eq!(args.container_id, "abc123");
        assert_eq!(
            args.cni_args(),
            vec![("K8S_POD_NAME", "web"), ("K8S_POD_NAMESPACE", "default")]
        );
        assert_eq!(args.cni_arg("K8S_POD_NAMESPACE"), Some("default"));
        assert_eq!(args.cni_arg("IgnoreUnknown"), None);
    }

    #[test]
    fn test_missing_variables_listed() {
        let err = CmdArgs::from_lookup(lookup(&[("CNI_COMMAND", "ADD"), ("CNI_IFNAME", "eth0")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid CNI environment: required env variables [CNI_CONTAINERID,CNI_NETNS,CNI_PATH] missing"
        );
        assert_eq!(err.code(), 4);
    }

    #[test]
    fn test_del_without_netns() {
        let args = CmdArgs::from_lookup(lookup(&[
            ("CNI_COMMAND", "DEL"),
            ("CNI_CONTAINERID", "abc123"),
            ("CNI_IFNAME", "eth0"),
            ("CNI_PATH", "/opt/cni/bin"),
        ]))
        .unwrap();
        assert_eq!(args.command, Command::Del);
        assert!(args.netns.is_empty());
    }

    #[test]
    fn test_version_needs_nothing_else() {
        let args = CmdArgs::from_lookup(lookup(&[("CNI_COMMAND", "VERSION")])).unwrap();
        assert_eq!(args.command, Command::Version);
    }

    #[test]
    fn test_unknown_command() {
        let err = CmdArgs::from_lookup(lookup(&[("CNI_COMMAND", "GC")])).unwrap_err();
        assert!(matches!(err, CniError::InvalidEnvironment(msg) if msg.contains("GC")));
        assert!(CmdArgs::from_lookup(lookup(&[])).is_err());
    }
}
