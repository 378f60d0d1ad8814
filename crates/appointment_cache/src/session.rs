use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::CacheError;
use crate::slot::{Slot, Window};
use crate::store::AvailabilityStore;
use crate::trace::TraceId;

enum SessionState {
    Uninitialized,
    Loaded(HashMap<String, Slot>),
    NoCache,
}

/// Answers "is this slot new" for one poll cycle.
///
/// The snapshot is read once by [`begin`](Self::begin) and never updated
/// afterwards, so every query in the cycle compares against the same
/// baseline. Without a store the session runs in no-cache mode and reports
/// every slot as new.
pub struct ChangeDetectionSession {
    store: Option<Arc<dyn AvailabilityStore>>,
    state: SessionState,
}

impl ChangeDetectionSession {
    /// Create a session; `None` means no backend could be reached
    pub fn new(store: Option<Arc<dyn AvailabilityStore>>) -> Self {
        Self {
            store,
            state: SessionState::Uninitialized,
        }
    }

    /// Load the snapshot for `window`.
    ///
    /// Without a store the session switches to no-cache mode. A load failure
    /// is returned and leaves the session unloaded.
    pub async fn begin(&mut self, window: &Window, trace: &TraceId) -> Result<(), CacheError> {
        let Some(store) = &self.store else {
            warn!(trace_id = %trace, "No cache store available, treating every slot as new");
            self.state = SessionState::NoCache;
            return Ok(());
        };

        let slots = store.load_window(window, trace).await?;
        info!(
            trace_id = %trace,
            "Loaded {} cached slots from {} store for {}",
            slots.len(),
            store.backend(),
            window
        );
        let snapshot = slots.into_iter().map(|s| (s.identity_key(), s)).collect();
        self.state = SessionState::Loaded(snapshot);
        Ok(())
    }

    /// Whether `slot` is absent from the snapshot loaded by `begin`
    pub fn is_new(&self, slot: &Slot) -> Result<bool, CacheError> {
        match &self.state {
            SessionState::Uninitialized => Err(CacheError::NotLoaded),
            SessionState::Loaded(snapshot) => Ok(!snapshot.contains_key(&slot.identity_key())),
            SessionState::NoCache => Ok(true),
        }
    }

    /// Whether the session fell back to treating everything as new
    pub fn is_no_cache(&self) -> bool {
        matches!(self.state, SessionState::NoCache)
    }

    /// Number of slots in the loaded snapshot
    pub fn cached_len(&self) -> usize {
        match &self.state {
            SessionState::Loaded(snapshot) => snapshot.len(),
            _ => 0,
        }
    }

    /// Store the session reads from, if any
    pub fn store(&self) -> Option<&Arc<dyn AvailabilityStore>> {
        self.store.as_ref()
    }

    /// End the cycle and drop the snapshot
    pub fn finish(self) {}
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::testing::{MemoryStore, slot_at};

    fn window() -> Window {
        Window::starting(5020, NaiveDate::from_ymd_opt(2024, 7, 10).unwrap(), 7).unwrap()
    }

    #[tokio::test]
    async fn test_is_new_before_begin_fails() {
        let session = ChangeDetectionSession::new(Some(Arc::new(MemoryStore::new())));
        let result = session.is_new(&slot_at(5020, "2024-07-10T08:00:00", 1));
        assert!(matches!(result, Err(CacheError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_detects_slots_missing_from_snapshot() {
        let cached = slot_at(5020, "2024-07-10T08:00:00", 1);
        let store = Arc::new(MemoryStore::with_slots(vec![cached.clone()]));
        let mut session = ChangeDetectionSession::new(Some(store));
        session.begin(&window(), &TraceId::generate()).await.unwrap();

        assert_eq!(session.cached_len(), 1);
        assert!(!session.is_new(&cached).unwrap());
        assert!(session.is_new(&slot_at(5020, "2024-07-10T08:10:00", 1)).unwrap());
        // Other locations never match
        assert!(session.is_new(&slot_at(5021, "2024-07-10T08:00:00", 1)).unwrap());
    }

    #[tokio::test]
    async fn test_capacity_changes_are_not_new() {
        let store = Arc::new(MemoryStore::with_slots(vec![slot_at(
            5020,
            "2024-07-10T08:00:00",
            1,
        )]));
        let mut session = ChangeDetectionSession::new(Some(store));
        session.begin(&window(), &TraceId::generate()).await.unwrap();

        assert!(!session.is_new(&slot_at(5020, "2024-07-10T08:00:00", 3)).unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_is_not_updated_by_replace() {
        let store = Arc::new(MemoryStore::new());
        let mut session = ChangeDetectionSession::new(Some(store.clone()));
        let trace = TraceId::generate();
        session.begin(&window(), &trace).await.unwrap();

        let slot = slot_at(5020, "2024-07-11T09:00:00", 1);
        store
            .replace_window(&window(), std::slice::from_ref(&slot), &trace)
            .await
            .unwrap();

        assert!(session.is_new(&slot).unwrap());
    }

    #[tokio::test]
    async fn test_without_store_everything_is_new() {
        let mut session = ChangeDetectionSession::new(None);
        session.begin(&window(), &TraceId::generate()).await.unwrap();

        assert!(session.is_no_cache());
        assert!(session.is_new(&slot_at(5020, "2024-07-10T08:00:00", 1)).unwrap());
    }

    #[tokio::test]
    async fn test_failed_load_is_returned() {
        let store = Arc::new(MemoryStore::new());
        store.fail_loads();
        let mut session = ChangeDetectionSession::new(Some(store));

        let result = session.begin(&window(), &TraceId::generate()).await;

        assert!(matches!(result, Err(CacheError::Transient { .. })));
        assert!(!session.is_no_cache());
        assert!(matches!(
            session.is_new(&slot_at(5020, "2024-07-10T08:00:00", 1)),
            Err(CacheError::NotLoaded)
        ));
    }
}
