/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for plugin operations
pub type CniResult<T> = Result<T, CniError>;

/// CNI wire error codes
pub mod codes {
    pub const INCOMPATIBLE_VERSION: u32 = 1;
    pub const UNKNOWN_CONTAINER: u32 = 3;
    pub const INVALID_ENVIRONMENT: u32 = 4;
    pub const IO_FAILURE: u32 = 5;
    pub const DECODING_FAILURE: u32 = 6;
    pub const INVALID_NETWORK_CONFIG: u32 = 7;
    pub const INTERNAL: u32 = 999;
}

/// Every failure the plugin can report to the container runtime
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CniError {
    #[error("invalid configuration: {0}")]
    #[diagnostic(
        code(cni::config),
        help("Check the subnet file and the network configuration passed on stdin.")
    )]
    Config(String),

    #[error("failed to decode {what}: {reason}")]
    #[diagnostic(code(cni::decode), help("The payload must be valid JSON."))]
    Decode { what: String, reason: String },

    #[error("no available ip in subnet {0}")]
    #[diagnostic(
        code(ipam::pool_exhausted),
        help("Every usable address is allocated. Remove stale containers or widen the subnet.")
    )]
    PoolExhausted(String),

    #[error("failed to find container {0} ip")]
    #[diagnostic(
        code(ipam::not_found),
        help("The container was never added to this network or has already been deleted.")
    )]
    NotFound(String),

    #[error("failed to find ip {expected} for {interface}")]
    #[diagnostic(
        code(network::address_mismatch),
        help("The container interface no longer carries its allocated address.")
    )]
    AddressMismatch { interface: String, expected: String },

    #[error("device error: {0}")]
    #[diagnostic(
        code(network::device),
        help("Netlink operations require CAP_NET_ADMIN.")
    )]
    Device(String),

    #[error("namespace error: {0}")]
    #[diagnostic(
        code(network::namespace),
        help("The network namespace path may be stale or the process lacks CAP_SYS_ADMIN.")
    )]
    Namespace(String),

    #[error("failed to lock allocation store: {0}")]
    #[diagnostic(code(ipam::lock), help("Check permissions on the data directory."))]
    Lock(String),

    #[error("allocation store error: {0}")]
    #[diagnostic(
        code(ipam::storage),
        help("The data directory may be read-only or the store file corrupted.")
    )]
    Storage(String),

    #[error("{0}")]
    #[diagnostic(code(cni::version), help("Supported versions are listed by the VERSION command."))]
    IncompatibleVersion(String),

    #[error("invalid CNI environment: {0}")]
    #[diagnostic(code(cni::environment), help("The runtime must set CNI_COMMAND, CNI_CONTAINERID and CNI_IFNAME."))]
    InvalidEnvironment(String),
}

impl CniError {
    /// CNI error code reported in the error envelope
    pub fn code(&self) -> u32 {
        match self {
            CniError::IncompatibleVersion(_) => codes::INCOMPATIBLE_VERSION,
            CniError::NotFound(_) => codes::UNKNOWN_CONTAINER,
            CniError::InvalidEnvironment(_) => codes::INVALID_ENVIRONMENT,
            CniError::Lock(_) | CniError::Storage(_) => codes::IO_FAILURE,
            CniError::Decode { .. } => codes::DECODING_FAILURE,
            CniError::Config(_) => codes::INVALID_NETWORK_CONFIG,
            CniError::PoolExhausted(_)
            | CniError::AddressMismatch { .. }
            | CniError::Device(_)
            | CniError::Namespace(_) => codes::INTERNAL,
        }
    }

    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CniError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
