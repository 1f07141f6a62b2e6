//! Presence store adapters.
//!
//! - `inmemory`: process-local TTL map (single-instance deployments and tests)
//! - `redis`: shared Redis keys with `EX` TTL (feature `redis-backend`)

pub mod inmemory;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use inmemory::InMemoryPresenceStore;
#[cfg(feature = "redis-backend")]
pub use redis::RedisPresenceStore;
