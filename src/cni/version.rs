/*!
 * CNI Versions
 * Supported versions and request compatibility checks
 */

use crate::core::errors::{CniError, CniResult};
use serde::{Deserialize, Serialize};

/// Version this plugin reports and renders by default
pub const CURRENT_VERSION: &str = "1.0.0";

pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Configs without `cniVersion` predate the field
pub const IMPLICIT_VERSION: &str = "0.1.0";

/// Reply to the VERSION command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub cni_version: String,
    pub supported_versions: Vec<String>,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            cni_version: CURRENT_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProbe {
    #[serde(default)]
    cni_version: String,
}

/// Read only `cniVersion` from the stdin config
pub fn config_version(stdin: &[u8]) -> CniResult<String> {
    let probe: VersionProbe = serde_json::from_slice(stdin)
        .map_err(|e| CniError::decode("version from network config", e))?;

    Ok(if probe.cni_version.is_empty() {
        IMPLICIT_VERSION.to_string()
    } else {
        probe.cni_version
    })
}

pub fn check_supported(version: &str) -> CniResult<()> {
    if SUPPORTED_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(CniError::IncompatibleVersion(format!(
            "incompatible CNI versions; config is {:?}, plugin supports {:?}",
            version, SUPPORTED_VERSIONS
        )))
    }
}

/// `major.minor.patch` as numbers
pub fn parse_version(version: &str) -> CniResult<(u32, u32, u32)> {
    let invalid = || CniError::IncompatibleVersion(format!("invalid version {:?}", version));

    let mut parts = version.split('.');
    let mut next = || -> CniResult<u32> {
        parts
            .next()
            .ok_or_else(invalid)?
            .parse::<u32>()
            .map_err(|_| invalid())
    };
    let parsed = (next()?, next()?, next()?);
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(parsed)
}

pub fn version_at_least(version: &str, minimum: &str) -> CniResult<bool> {
    Ok(parse_version(version)? >= parse_version(minimum)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_version() {
        assert_eq!(config_version(br#"{"cniVersion":"0.4.0"}"#).unwrap(), "0.4.0");
        assert_eq!(config_version(br#"{"name":"n"}"#).unwrap(), "0.1.0");
        assert!(matches!(config_version(b"{"), Err(CniError::Decode { .. })));
    }

    #[test]
    fn test_check_supported() {
        for v in SUPPORTED_VERSIONS {
            assert!(check_supported(v).is_ok());
        }
        let err = check_supported("9.9.9").unwrap_err();
        assert_eq!(err.code(), 1);
        assert!(err.to_string().starts_with("incompatible CNI versions"));
    }

    #[test]
    fn test_version_ordering() {
        assert!(version_at_least("0.4.0", "0.4.0").unwrap());
        assert!(version_at_least("1.0.0", "0.4.0").unwrap());
        assert!(!version_at_least("0.3.1", "0.4.0").unwrap());
        assert!(version_at_least("0.10.0", "0.4.0").unwrap());
        assert!(parse_version("1.0").is_err());
        assert!(parse_version("1.0.0.0").is_err());
    }

    #[test]
    fn test_version_info_json() {
        let json = serde_json::to_string(&VersionInfo::current()).unwrap();
        assert_eq!(
            json,
            r#"{"cniVersion":"1.0.0","supportedVersions":["0.1.0","0.2.0","0.3.0","0.3.1","0.4.0","1.0.0"]}"#
        );
    }
}
