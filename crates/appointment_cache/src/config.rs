use std::time::Duration;

use crate::retry::RetryPolicy;

/// Settings for every cache backend; the factory tries them in the order
/// Redis, SQL, blob and skips the disabled ones.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Key/value backend
    pub redis: RedisConfig,
    /// Relational backend
    pub sql: SqlConfig,
    /// Blob backend
    pub blob: BlobConfig,
}

/// Redis backend settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Whether the factory should try this backend
    pub enabled: bool,
    /// Connection URL, e.g. `redis://localhost:6379`
    pub url: Option<String>,
    /// How long to wait for a pooled connection (default: 5 seconds)
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// PostgreSQL backend settings
#[derive(Debug, Clone)]
pub struct SqlConfig {
    /// Whether the factory should try this backend
    pub enabled: bool,
    /// Connection URL, e.g. `postgres://localhost/appointments`
    pub url: Option<String>,
    /// Retry applied to reads, deletes and inserts
    pub retry: RetryPolicy,
    /// How long to wait for a pooled connection (default: 30 seconds)
    pub acquire_timeout: Duration,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            retry: RetryPolicy::default(),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// S3 blob backend settings
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Whether the factory should try this backend
    pub enabled: bool,
    /// Bucket holding one JSON document per location
    pub bucket: Option<String>,
    /// Key prefix for the documents (default: `availability/`)
    pub prefix: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: None,
            prefix: "availability/".to_string(),
        }
    }
}
