/*!
 * IP Address Management
 * Durable, lock-guarded container -> IP allocation
 */

mod allocator;
mod store;
mod types;

pub use allocator::{IpAllocator, MAX_PREFIX_LEN};
pub use store::{AllocationStore, StoreGuard, DATA_FILE, LOCK_FILE};
pub use types::*;
