//! Query models, keys, result types, and errors.

pub mod key;
pub mod types;

// Re-exports for convenience
pub use key::QueryKey;
pub use types::{
    Candidate, EntityFilter, EntityKind, Payload, QueryError, Result, ResultItem, RouteType,
};
