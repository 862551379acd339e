//! Cache and query configuration.
//!
//! With the `serde` feature enabled every type deserializes from partial
//! documents; missing fields take their defaults.

use std::time::Duration;

use crate::models::types::{QueryError, Result};
use crate::spatial::coordinate::METERS_PER_MILE;

pub const DEFAULT_TTL_SECONDS: u64 = 300;
pub const DEFAULT_MAX_ENTRIES: usize = 1024;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

pub const DEFAULT_MAX_RADIUS_METERS: f64 = 50.0 * METERS_PER_MILE;
pub const DEFAULT_MAX_LIMIT: usize = 1000;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
    /// Entry count above which the oldest entries are evicted
    pub max_entries: usize,
    /// 0 disables the background sweeper
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_seconds == 0 {
            return Err(QueryError::InvalidParameter(
                "defaultTtlSeconds must be greater than 0".into(),
            ));
        }
        if self.max_entries == 0 {
            return Err(QueryError::InvalidParameter(
                "maxEntries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }
}

/// Upper bounds on caller-supplied query parameters. Values above a bound
/// are rejected, never clamped.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct QueryLimits {
    pub max_radius_meters: f64,
    pub max_limit: usize,
    pub max_page_size: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_radius_meters: DEFAULT_MAX_RADIUS_METERS,
            max_limit: DEFAULT_MAX_LIMIT,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl QueryLimits {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_radius_meters > 0.0 && self.max_radius_meters.is_finite()) {
            return Err(QueryError::InvalidParameter(format!(
                "maxRadiusMeters must be a positive finite number, got {}",
                self.max_radius_meters
            )));
        }
        if self.max_limit == 0 {
            return Err(QueryError::InvalidParameter("maxLimit must be at least 1".into()));
        }
        if self.max_page_size == 0 {
            return Err(QueryError::InvalidParameter(
                "maxPageSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub limits: QueryLimits,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.limits.validate()
    }
}
