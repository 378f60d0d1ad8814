use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::{Pool, PooledConnection, RunError};
use bb8_redis::redis::{self, AsyncCommands, RedisError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, info};

use super::{AvailabilityStore, BackendKind, Clock, local_now, sort_by_timestamp};
use crate::error::CacheError;
use crate::slot::{Slot, Window};
use crate::trace::TraceId;

/// Minimal string key/value operations the per-day store needs
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// Connectivity check
    async fn ping(&self) -> Result<(), CacheError>;

    /// Read a value, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value that the server expires after `ttl_seconds`
    async fn set_with_expiry(&self, key: &str, value: &str, ttl_seconds: u64)
    -> Result<(), CacheError>;

    /// Delete keys; missing keys are ignored
    async fn delete(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Keys matching a glob pattern such as `5020-*`
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

/// Redis client backed by a bb8 connection pool
pub struct RedisKeyValueClient {
    pool: Pool<RedisConnectionManager>,
}

impl RedisKeyValueClient {
    /// Build the pool; no connection is opened until the first command
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CacheError> {
        let manager = RedisConnectionManager::new(url).map_err(|e| unavailable(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(connect_timeout)
            .build(manager)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, CacheError> {
        self.pool.get().await.map_err(|e| match e {
            RunError::User(e) => redis_error(e),
            RunError::TimedOut => unavailable("timed out waiting for a connection"),
        })
    }
}

#[async_trait]
impl KeyValueClient for RedisKeyValueClient {
    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(redis_error)?;

        if pong != "PONG" {
            return Err(unavailable(format!("unexpected PING reply: {}", pong)));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await.map_err(redis_error)?;
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(key, value, ttl_seconds)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: () = conn.del(keys.to_vec()).await.map_err(redis_error)?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await.map_err(redis_error)?;
        Ok(keys)
    }
}

/// Availability partitioned into one key per location and calendar day.
///
/// Each key holds that day's slots as a JSON array and expires at midnight
/// at the end of the day. Days are written independently, so a failed
/// replace can leave a mix of fresh and stale days.
pub struct KeyValueStore {
    client: Arc<dyn KeyValueClient>,
    clock: Clock,
}

impl KeyValueStore {
    /// Wrap a client after checking that it answers a ping
    pub async fn connect(client: Arc<dyn KeyValueClient>) -> Result<Self, CacheError> {
        client.ping().await.map_err(|e| unavailable(e.to_string()))?;
        Ok(Self {
            client,
            clock: local_now,
        })
    }

    /// Replace the clock used to compute key expiry
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// Key holding one location's slots for one day: `"{location}-{yyyy-MM-dd}"`
pub fn day_key(location_id: i32, date: NaiveDate) -> String {
    format!("{}-{}", location_id, date.format("%Y-%m-%d"))
}

/// Seconds from `now` until midnight at the end of `date`
pub fn seconds_until_expiry(date: NaiveDate, now: NaiveDateTime) -> i64 {
    let expires_at = date
        .succ_opt()
        .unwrap_or(date)
        .and_time(NaiveTime::MIN);
    (expires_at - now).num_seconds()
}

#[async_trait]
impl AvailabilityStore for KeyValueStore {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn load_window(&self, window: &Window, trace: &TraceId) -> Result<Vec<Slot>, CacheError> {
        let mut slots = Vec::new();

        for date in window.days() {
            let key = day_key(window.location_id, date);
            match self.client.get(&key).await? {
                Some(value) if !value.is_empty() => {
                    let day_slots: Vec<Slot> = serde_json::from_str(&value)?;
                    slots.extend(day_slots);
                }
                _ => debug!(trace_id = %trace, "No cached slots under {}", key),
            }
        }

        sort_by_timestamp(&mut slots);
        Ok(slots)
    }

    async fn replace_window(
        &self,
        window: &Window,
        slots: &[Slot],
        trace: &TraceId,
    ) -> Result<(), CacheError> {
        let mut by_date: HashMap<NaiveDate, Vec<&Slot>> = HashMap::new();
        for slot in slots.iter().filter(|s| s.location_id == window.location_id && window.contains(&s.timestamp)) {
            by_date.entry(slot.date()).or_default().push(slot);
        }

        let now = (self.clock)();
        for date in window.days() {
            let key = day_key(window.location_id, date);
            match u64::try_from(seconds_until_expiry(date, now)) {
                Ok(ttl) if ttl > 0 => {
                    let day_slots = by_date.remove(&date).unwrap_or_default();
                    let value = serde_json::to_string(&day_slots)?;
                    self.client.set_with_expiry(&key, &value, ttl).await?;
                }
                // The whole day is already over
                _ => self.client.delete(std::slice::from_ref(&key)).await?,
            }
        }

        info!(
            trace_id = %trace,
            "Cached {} slots for {} across {} daily keys",
            slots.len(),
            window,
            window.len_days()
        );
        Ok(())
    }

    async fn clear(&self, location_id: i32, trace: &TraceId) -> Result<(), CacheError> {
        let keys = self.client.keys(&format!("{}-*", location_id)).await?;
        info!(trace_id = %trace, "Clearing {} cached days for location {}", keys.len(), location_id);
        self.client.delete(&keys).await
    }
}

fn unavailable(reason: impl Into<String>) -> CacheError {
    CacheError::StoreUnavailable {
        backend: BackendKind::KeyValue,
        reason: reason.into(),
    }
}

fn redis_error(err: RedisError) -> CacheError {
    if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Transient {
            backend: BackendKind::KeyValue,
            reason: err.to_string(),
        }
    } else {
        CacheError::Persistent {
            backend: BackendKind::KeyValue,
            reason: err.to_string(),
        }
    }
}
