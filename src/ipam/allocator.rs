/*!
 * IP Allocator
 * Subnet-aware allocate / release / lookup on top of the allocation store
 */

use super::store::AllocationStore;
use crate::core::errors::{CniError, CniResult};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use tracing::{debug, info, trace};

/// Largest prefix that still leaves a gateway plus one container address
pub const MAX_PREFIX_LEN: u8 = 30;

/// Allocates container addresses from one subnet
///
/// The gateway (network address + 1) is reserved for the bridge and the
/// broadcast address is never handed out.
pub struct IpAllocator<'s> {
    subnet: Ipv4Network,
    gateway: Ipv4Addr,
    store: &'s AllocationStore,
}

impl<'s> IpAllocator<'s> {
    pub fn new(subnet: &str, store: &'s AllocationStore) -> CniResult<Self> {
        let parsed: Ipv4Network = subnet
            .trim()
            .parse()
            .map_err(|e| CniError::Config(format!("invalid subnet {:?}: {}", subnet, e)))?;

        if parsed.prefix() > MAX_PREFIX_LEN {
            return Err(CniError::Config(format!(
                "subnet {} has no room for a gateway and a container (prefix must be <= {})",
                subnet, MAX_PREFIX_LEN
            )));
        }

        // Normalize host bits away, "10.0.0.7/24" describes 10.0.0.0/24
        let subnet = Ipv4Network::new(parsed.network(), parsed.prefix())
            .map_err(|e| CniError::Config(e.to_string()))?;
        let gateway = Ipv4Addr::from(u32::from(subnet.network()) + 1);

        Ok(Self {
            subnet,
            gateway,
            store,
        })
    }

    /// Return the container's address, allocating one on first call
    ///
    /// Holds the exclusive store lock for the whole search, including the
    /// lookup that may short-circuit.
    pub fn allocate_ip(&self, id: &str, if_name: &str) -> CniResult<Ipv4Addr> {
        let mut guard = self.store.lock()?;
        guard.load_data()?;

        if let Some(ip) = guard.get_ip_by_id(id) {
            debug!(container_id = id, %ip, "container already has an address");
            return Ok(ip);
        }

        let start = guard
            .last()
            .filter(|ip| self.is_assignable(*ip))
            .unwrap_or(self.gateway);

        let mut cursor = start;
        for _ in 0..self.capacity() {
            cursor = match self.next_ip(cursor) {
                Some(next) => next,
                // Overflow past the top of the range wraps to just above the gateway
                None => match self.next_ip(self.gateway) {
                    Some(first) => first,
                    None => break,
                },
            };

            trace!(candidate = %cursor, "probing address");
            if !guard.contain(cursor) {
                guard.add(cursor, id, if_name)?;
                guard.unlock()?;
                info!(container_id = id, ip = %cursor, subnet = %self.subnet, "allocated address");
                return Ok(cursor);
            }
        }

        Err(CniError::PoolExhausted(self.subnet.to_string()))
    }

    /// Drop the container's record; releasing an unknown container succeeds
    pub fn release_ip(&self, id: &str) -> CniResult<()> {
        let mut guard = self.store.lock()?;
        guard.load_data()?;

        match guard.get_ip_by_id(id) {
            Some(ip) => {
                guard.del(id)?;
                info!(container_id = id, %ip, "released address");
            }
            None => debug!(container_id = id, "nothing to release"),
        }
        guard.unlock()
    }

    pub fn check_ip(&self, id: &str) -> CniResult<Ipv4Addr> {
        let mut guard = self.store.rlock()?;
        guard.load_data()?;

        guard
            .get_ip_by_id(id)
            .ok_or_else(|| CniError::NotFound(id.to_string()))
    }

    pub fn subnet(&self) -> Ipv4Network {
        self.subnet
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.subnet.mask()
    }

    pub fn prefix_len(&self) -> u8 {
        self.subnet.prefix()
    }

    /// `ip` with this subnet's prefix length
    pub fn ip_net(&self, ip: Ipv4Addr) -> Ipv4Network {
        // prefix already validated in new()
        Ipv4Network::new(ip, self.subnet.prefix()).unwrap_or(self.subnet)
    }

    /// Next address strictly inside the usable range, or None on overflow
    pub fn next_ip(&self, ip: Ipv4Addr) -> Option<Ipv4Addr> {
        let next = u32::from(ip).checked_add(1)?;
        if next > u32::from(self.gateway) && next < u32::from(self.subnet.broadcast()) {
            Some(Ipv4Addr::from(next))
        } else {
            None
        }
    }

    /// Number of addresses available to containers
    pub fn capacity(&self) -> u32 {
        u32::from(self.subnet.broadcast()) - u32::from(self.gateway) - 1
    }

    fn is_assignable(&self, ip: Ipv4Addr) -> bool {
        let raw = u32::from(ip);
        raw > u32::from(self.gateway) && raw < u32::from(self.subnet.broadcast())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn store(dir: &TempDir) -> AllocationStore {
        AllocationStore::open(dir.path(), "test-net").unwrap()
    }

    #[test]
    fn test_gateway_and_mask() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ipam = IpAllocator::new("10.244.1.0/24", &store).unwrap();

        assert_eq!(ipam.gateway(), ip("10.244.1.1"));
        assert_eq!(ipam.mask(), ip("255.255.255.0"));
        assert_eq!(ipam.prefix_len(), 24);
        assert_eq!(ipam.capacity(), 253);
        assert_eq!(ipam.ip_net(ip("10.244.1.9")).to_string(), "10.244.1.9/24");
    }

    #[test]
    fn test_host_bits_normalized() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ipam = IpAllocator::new("10.0.0.77/24", &store).unwrap();
        assert_eq!(ipam.subnet().network(), ip("10.0.0.0"));
        assert_eq!(ipam.gateway(), ip("10.0.0.1"));
    }

    #[test]
    fn test_malformed_subnet() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for bad in ["", "10.0.0.0", "10.0.0.0/33", "not-a-cidr", "10.0.0.0/31", "10.0.0.0/32"] {
            assert!(
                matches!(IpAllocator::new(bad, &store), Err(CniError::Config(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_next_ip_overflow() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ipam = IpAllocator::new("10.0.0.0/29", &store).unwrap();

        assert_eq!(ipam.next_ip(ip("10.0.0.1")), Some(ip("10.0.0.2")));
        assert_eq!(ipam.next_ip(ip("10.0.0.5")), Some(ip("10.0.0.6")));
        assert_eq!(ipam.next_ip(ip("10.0.0.6")), None);
    }

    #[test]
    fn test_first_allocation_follows_gateway() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ipam = IpAllocator::new("10.0.0.0/24", &store).unwrap();

        assert_eq!(ipam.allocate_ip("c1", "eth0").unwrap(), ip("10.0.0.2"));
        assert_eq!(ipam.allocate_ip("c2", "eth0").unwrap(), ip("10.0.0.3"));
    }

    #[test]
    fn test_cursor_resumes_after_release() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ipam = IpAllocator::new("10.0.0.0/24", &store).unwrap();

        ipam.allocate_ip("c1", "eth0").unwrap();
        ipam.allocate_ip("c2", "eth0").unwrap();
        ipam.release_ip("c1").unwrap();

        // .2 is free again but the cursor sits at .3
        assert_eq!(ipam.allocate_ip("c3", "eth0").unwrap(), ip("10.0.0.4"));
    }

    #[test]
    fn test_stale_cursor_outside_subnet() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        {
            let mut guard = store.lock().unwrap();
            guard.load_data().unwrap();
            guard.add(ip("192.168.5.5"), "old", "eth0").unwrap();
        }

        let ipam = IpAllocator::new("10.0.0.0/24", &store).unwrap();
        assert_eq!(ipam.allocate_ip("c1", "eth0").unwrap(), ip("10.0.0.2"));
    }
}
