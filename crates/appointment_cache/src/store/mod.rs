use std::fmt;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use crate::error::CacheError;
use crate::slot::{Slot, Window};
use crate::trace::TraceId;

/// S3-backed whole-document store
pub mod blob;
/// Redis-backed per-day store
pub mod key_value;
/// PostgreSQL-backed range store
pub mod relational;

pub use blob::{BlobClient, BlobStore, S3BlobClient};
pub use key_value::{KeyValueClient, KeyValueStore, RedisKeyValueClient};
pub use relational::RelationalStore;

/// The three interchangeable backends, in factory preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Redis, one key per location and day
    KeyValue,
    /// PostgreSQL, one row per slot
    Relational,
    /// S3, one JSON document per location
    Blob,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::KeyValue => "key/value",
            BackendKind::Relational => "relational",
            BackendKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// Persisted "last known full availability" for location windows
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> BackendKind;

    /// Slots whose timestamp falls on a date in `window`, ordered by timestamp
    async fn load_window(&self, window: &Window, trace: &TraceId) -> Result<Vec<Slot>, CacheError>;

    /// Replace whatever is stored for `window` with `slots`
    async fn replace_window(
        &self,
        window: &Window,
        slots: &[Slot],
        trace: &TraceId,
    ) -> Result<(), CacheError>;

    /// Remove everything stored for a location
    async fn clear(&self, location_id: i32, trace: &TraceId) -> Result<(), CacheError>;
}

/// Source of "now" in the facility's local time
pub type Clock = fn() -> NaiveDateTime;

/// Wall-clock local time
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub(crate) fn sort_by_timestamp(slots: &mut [Slot]) {
    slots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}
