//! Issue caching.
//!
//! - [`memory`]: TTL cache used as the in-memory tier
//! - [`persistent`]: the on-disk cache document and its stores
//! - [`manager`]: two-tier resolution with in-flight deduplication

pub mod manager;
pub mod memory;
pub mod persistent;

pub use manager::{CacheManager, CacheStats};
pub use memory::TtlCache;
pub use persistent::{CacheDocument, CacheStore, FileStore, MemoryStore};
