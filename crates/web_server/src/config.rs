use std::str::FromStr;
use std::time::Duration;

use appointment_cache::{BlobConfig, CacheConfig, RedisConfig, RetryPolicy, SqlConfig};
use notification_services::NotifierConfig;

/// Configuration value that could not be parsed
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Value present but malformed
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Environment variable name
        key: String,
        /// Raw value found
        value: String,
    },
}

/// What the poll cycle watches and how often
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Locations polled each cycle (default: 5020)
    pub location_ids: Vec<i32>,
    /// Days in the window, starting tomorrow (default: 7)
    pub window_days: u32,
    /// Whether the open slots are written back to the cache (default: true)
    pub cache_available_slots: bool,
    /// Publish new slots to the queue
    pub queue_enabled: bool,
    /// Queue URL for publishing and consuming
    pub queue_url: Option<String>,
    /// Scheduler URL template, `None` for the public endpoint
    pub source_url: Option<String>,
    /// Timer period (default: 2 minutes)
    pub poll_interval: Duration,
    /// First and last local hour the timer runs in, inclusive (default: 7-21)
    pub active_hours: (u32, u32),
    /// Skip timer cycles entirely, for local debugging
    pub ignore_timer: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            location_ids: vec![5020],
            window_days: 7,
            cache_available_slots: true,
            queue_enabled: false,
            queue_url: None,
            source_url: None,
            poll_interval: Duration::from_secs(120),
            active_hours: (7, 21),
            ignore_timer: false,
        }
    }
}

/// Everything the server reads from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Cache backends
    pub cache: CacheConfig,
    /// Batching and SMS budgets
    pub notifier: NotifierConfig,
    /// Poll cycle settings
    pub poller: PollerConfig,
    /// Sender address for alert emails
    pub from_email: String,
    /// Address the HTTP server binds to (default: 0.0.0.0:8080)
    pub bind_addr: String,
}

impl AppConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let redis_defaults = RedisConfig::default();
        let sql_defaults = SqlConfig::default();
        let blob_defaults = BlobConfig::default();
        let notifier_defaults = NotifierConfig::default();
        let poller_defaults = PollerConfig::default();

        let cache = CacheConfig {
            redis: RedisConfig {
                enabled: env.flag("REDIS_ENABLED", redis_defaults.enabled)?,
                url: env.string("REDIS_URL"),
                ..redis_defaults
            },
            sql: SqlConfig {
                enabled: env.flag("SQL_ENABLED", sql_defaults.enabled)?,
                url: env.string("DATABASE_URL"),
                retry: RetryPolicy {
                    max_attempts: env.parse("SQL_RETRY_ATTEMPTS", sql_defaults.retry.max_attempts)?,
                    backoff: Duration::from_secs(
                        env.parse("SQL_RETRY_BACKOFF_SECS", sql_defaults.retry.backoff.as_secs())?,
                    ),
                },
                ..sql_defaults
            },
            blob: BlobConfig {
                enabled: env.flag("BLOB_ENABLED", blob_defaults.enabled)?,
                bucket: env.string("BLOB_BUCKET"),
                prefix: env.string("BLOB_PREFIX").unwrap_or(blob_defaults.prefix),
            },
        };

        let notifier = NotifierConfig {
            queue_max_bytes: env.parse("QUEUE_MAX_BYTES", notifier_defaults.queue_max_bytes)?,
            sms_max_chars: env.parse("SMS_MAX_CHARS", notifier_defaults.sms_max_chars)?,
            max_short_notifications: env.parse(
                "MAX_SHORT_NOTIFICATIONS",
                notifier_defaults.max_short_notifications,
            )?,
            sms_throttle_every: env.parse("SMS_THROTTLE_EVERY", notifier_defaults.sms_throttle_every)?,
            sms_throttle_pause: Duration::from_millis(env.parse(
                "SMS_THROTTLE_PAUSE_MS",
                u64::try_from(notifier_defaults.sms_throttle_pause.as_millis()).unwrap_or(1000),
            )?),
        };

        let poller = PollerConfig {
            location_ids: match env.string("LOCATION_IDS") {
                Some(raw) => parse_list("LOCATION_IDS", &raw)?,
                None => poller_defaults.location_ids,
            },
            window_days: env.parse("WINDOW_DAYS", poller_defaults.window_days)?,
            cache_available_slots: env
                .flag("CACHE_AVAILABLE_SLOTS", poller_defaults.cache_available_slots)?,
            queue_enabled: env.flag("QUEUE_ENABLED", poller_defaults.queue_enabled)?,
            queue_url: env.string("QUEUE_URL"),
            source_url: env.string("SOURCE_URL"),
            poll_interval: Duration::from_secs(
                env.parse("POLL_INTERVAL_SECS", poller_defaults.poll_interval.as_secs())?,
            ),
            active_hours: match env.string("ACTIVE_HOURS") {
                Some(raw) => parse_hours("ACTIVE_HOURS", &raw)?,
                None => poller_defaults.active_hours,
            },
            ignore_timer: env.flag("IGNORE_TIMER", poller_defaults.ignore_timer)?,
        };

        Ok(Self {
            cache,
            notifier,
            poller,
            from_email: env
                .string("FROM_EMAIL")
                .unwrap_or_else(|| "noreply@example.com".to_string()),
            bind_addr: env
                .string("BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            Some(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &raw)),
            },
            None => Ok(default),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_list(key: &str, raw: &str) -> Result<Vec<i32>, ConfigError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| invalid(key, raw)))
        .collect::<Result<Vec<i32>, _>>()?;

    if ids.is_empty() {
        return Err(invalid(key, raw));
    }
    Ok(ids)
}

fn parse_hours(key: &str, raw: &str) -> Result<(u32, u32), ConfigError> {
    let (start, end) = raw.split_once('-').ok_or_else(|| invalid(key, raw))?;
    let start: u32 = start.trim().parse().map_err(|_| invalid(key, raw))?;
    let end: u32 = end.trim().parse().map_err(|_| invalid(key, raw))?;

    if start > end || end > 23 {
        return Err(invalid(key, raw));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert!(!config.cache.redis.enabled);
        assert!(!config.cache.sql.enabled);
        assert!(config.cache.blob.enabled);
        assert_eq!(config.cache.sql.retry, RetryPolicy::default());
        assert_eq!(config.notifier, NotifierConfig::default());
        assert_eq!(config.poller, PollerConfig::default());
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("REDIS_ENABLED", "true"),
            ("REDIS_URL", "redis://cache:6379"),
            ("SQL_RETRY_ATTEMPTS", "5"),
            ("SQL_RETRY_BACKOFF_SECS", "1"),
            ("BLOB_ENABLED", "false"),
            ("LOCATION_IDS", "5020, 5021"),
            ("WINDOW_DAYS", "14"),
            ("SMS_MAX_CHARS", "320"),
            ("ACTIVE_HOURS", "6-22"),
            ("QUEUE_ENABLED", "yes"),
        ])
        .unwrap();

        assert!(config.cache.redis.enabled);
        assert_eq!(config.cache.redis.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.cache.sql.retry.max_attempts, 5);
        assert_eq!(config.cache.sql.retry.backoff, Duration::from_secs(1));
        assert!(!config.cache.blob.enabled);
        assert_eq!(config.poller.location_ids, vec![5020, 5021]);
        assert_eq!(config.poller.window_days, 14);
        assert_eq!(config.notifier.sms_max_chars, 320);
        assert_eq!(config.poller.active_hours, (6, 22));
        assert!(config.poller.queue_enabled);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("WINDOW_DAYS", "  "), ("REDIS_URL", "")]).unwrap();
        assert_eq!(config.poller.window_days, 7);
        assert_eq!(config.cache.redis.url, None);
    }

    #[rstest]
    #[case("WINDOW_DAYS", "seven")]
    #[case("REDIS_ENABLED", "maybe")]
    #[case("LOCATION_IDS", "5020,abc")]
    #[case("LOCATION_IDS", ",")]
    #[case("ACTIVE_HOURS", "21-7")]
    #[case("ACTIVE_HOURS", "7")]
    #[case("ACTIVE_HOURS", "7-24")]
    fn test_invalid_values(#[case] key: &str, #[case] value: &str) {
        assert_eq!(
            config_from(&[(key, value)]).unwrap_err(),
            ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
            }
        );
    }
}
