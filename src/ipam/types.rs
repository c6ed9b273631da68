/*!
 * IPAM Types
 * Persisted allocation records and lock-mode markers
 */

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// One container's address reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    #[serde(rename = "ifName")]
    pub if_name: String,
    pub ip: Ipv4Addr,
}

/// On-disk layout of a network's allocation set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    /// Most recently added address; search cursor for the next allocation
    #[serde(default)]
    pub last: Option<Ipv4Addr>,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
}

/// Lock mode marker traits
pub trait LockMode: Send + Sync {
    const NAME: &'static str;
}

/// Type marker for an exclusive (writer) lock
pub struct Exclusive;
impl LockMode for Exclusive {
    const NAME: &'static str = "exclusive";
}

/// Type marker for a shared (reader) lock
pub struct Shared;
impl LockMode for Shared {
    const NAME: &'static str = "shared";
}
