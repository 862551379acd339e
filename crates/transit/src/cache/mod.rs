//! TTL result cache with single-flight computation per key.

pub mod snapshot;
pub mod stats;
pub mod store;

pub use snapshot::Snapshot;
pub use stats::CacheStats;
pub use store::ResultCache;
