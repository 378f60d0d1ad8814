//! # Appointment Cache
//!
//! This crate decides which appointment slots are new since the last poll.
//! It persists the full availability snapshot of a location in one of three
//! interchangeable backends (Redis, PostgreSQL, S3) and answers "is this slot
//! new" queries against the snapshot that was current when a cycle began.

/// Cache configuration shared by the store factory and the backends
pub mod config;
/// Error taxonomy for store and session operations
pub mod error;
/// Ordered backend fallback when creating a store
pub mod factory;
/// Bounded retry for transient backend failures
pub mod retry;
/// Per-cycle change detection over a loaded snapshot
pub mod session;
/// Slot identity and the location/date window types
mod slot;
/// Store capability trait and its backends
pub mod store;
/// Correlation ids threaded through every call of a cycle
mod trace;

/// In-memory backend clients used by tests
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{BlobConfig, CacheConfig, RedisConfig, SqlConfig};
pub use error::CacheError;
pub use factory::{ConfiguredStoreProvider, StoreCandidate, StoreProvider, create_store};
pub use retry::{ErrorClass, RetryPolicy};
pub use session::ChangeDetectionSession;
pub use slot::*;
pub use store::{AvailabilityStore, BackendKind};
pub use trace::TraceId;
