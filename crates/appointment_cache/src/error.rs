use chrono::NaiveDate;

use crate::store::BackendKind;

/// Custom error type for cache store and session operations
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// Backend unreachable or never constructed
    #[error("{backend} store unavailable: {reason}")]
    StoreUnavailable {
        /// Backend that could not be reached
        backend: BackendKind,
        /// What went wrong while connecting
        reason: String,
    },

    /// Timeout or connection reset that outlived the retry budget
    #[error("Transient {backend} store error: {reason}")]
    Transient {
        /// Backend that reported the failure
        backend: BackendKind,
        /// Last error seen
        reason: String,
    },

    /// Any other backend error (auth, schema, serialization)
    #[error("{backend} store error: {reason}")]
    Persistent {
        /// Backend that reported the failure
        backend: BackendKind,
        /// Backend error text
        reason: String,
    },

    /// Session queried before its snapshot was loaded
    #[error("Change detection session queried before begin()")]
    NotLoaded,

    /// Every backend candidate failed to construct
    #[error("No cache store could be created")]
    NoStoreAvailable,

    /// Window whose end date precedes its start date
    #[error("Invalid window: {end} is before {start}")]
    InvalidWindow {
        /// Requested first date
        start: NaiveDate,
        /// Requested last date
        end: NaiveDate,
    },

    /// Stored snapshot could not be encoded or decoded
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Whether this error means the backend could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable { .. } | CacheError::NoStoreAvailable
        )
    }
}
