use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::CacheError;
use crate::slot::{Slot, Window};
use crate::store::{AvailabilityStore, BackendKind, BlobClient, KeyValueClient};
use crate::trace::TraceId;

/// Key/value client held in a map; TTLs are recorded but never enforced
#[derive(Default)]
pub struct MemoryKeyValueClient {
    entries: Mutex<HashMap<String, (String, u64)>>,
    unreachable: bool,
}

impl MemoryKeyValueClient {
    /// Empty, reachable client
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose every call fails as unavailable
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored value for a key
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|(value, _)| value.clone())
    }

    /// TTL in seconds a key was last written with
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.lock().get(key).map(|(_, ttl)| *ttl)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, u64)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reachable(&self) -> Result<(), CacheError> {
        if self.unreachable {
            return Err(CacheError::StoreUnavailable {
                backend: BackendKind::KeyValue,
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueClient for MemoryKeyValueClient {
    async fn ping(&self) -> Result<(), CacheError> {
        self.reachable()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.reachable()?;
        Ok(self.raw(key))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        self.reachable()?;
        self.lock()
            .insert(key.to_string(), (value.to_string(), ttl_seconds));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        self.reachable()?;
        let mut entries = self.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.reachable()?;
        let entries = self.lock();
        let mut keys: Vec<String> = match pattern.strip_suffix('*') {
            Some(prefix) => entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => entries.keys().filter(|k| *k == pattern).cloned().collect(),
        };
        keys.sort();
        Ok(keys)
    }
}

/// Blob client held in a map
#[derive(Default)]
pub struct MemoryBlobClient {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    unreachable: bool,
}

impl MemoryBlobClient {
    /// Empty, reachable container
    pub fn new() -> Self {
        Self::default()
    }

    /// Container whose every call fails as unavailable
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Stored bytes for an object
    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().get(name).cloned()
    }

    /// Seed an object with serialized slots
    pub fn put_json(&self, name: &str, slots: &[Slot]) {
        let body = serde_json::to_vec(slots).unwrap_or_default();
        self.lock().insert(name.to_string(), body);
    }

    /// Number of uploads performed
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reachable(&self) -> Result<(), CacheError> {
        if self.unreachable {
            return Err(CacheError::StoreUnavailable {
                backend: BackendKind::Blob,
                reason: "container not found".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    async fn check(&self) -> Result<(), CacheError> {
        self.reachable()
    }

    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.reachable()?;
        Ok(self.object(name))
    }

    async fn upload(&self, name: &str, body: Vec<u8>) -> Result<(), CacheError> {
        self.reachable()?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(name.to_string(), body);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CacheError> {
        self.reachable()?;
        self.lock().remove(name);
        Ok(())
    }
}

/// Availability store kept in memory, keyed by location.
///
/// Replacing a window overwrites the slots on the window's dates and keeps
/// the rest. Loads and replaces can be made to fail.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<i32, Vec<Slot>>>,
    fail_loads: AtomicBool,
    failing_locations: Mutex<HashSet<i32>>,
    fail_replaces: AtomicBool,
    yield_on_access: AtomicBool,
    replaces: AtomicUsize,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding `slots`
    pub fn with_slots(slots: Vec<Slot>) -> Self {
        let store = Self::new();
        {
            let mut map = store.lock();
            for slot in slots {
                map.entry(slot.location_id).or_default().push(slot);
            }
        }
        store
    }

    /// Make every later load fail with a transient error
    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }

    /// Make later loads of one location fail with a transient error
    pub fn fail_loads_for(&self, location_id: i32) {
        self.failing_locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(location_id);
    }

    /// Yield to the runtime before every load and replace, like a networked backend
    pub fn yield_on_access(&self) {
        self.yield_on_access.store(true, Ordering::SeqCst);
    }

    /// Make every later replace fail with a transient error
    pub fn fail_replaces(&self) {
        self.fail_replaces.store(true, Ordering::SeqCst);
    }

    /// Slots stored for a location, ordered by timestamp
    pub fn snapshot(&self, location_id: i32) -> Vec<Slot> {
        let mut slots = self.lock().get(&location_id).cloned().unwrap_or_default();
        slots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        slots
    }

    /// Number of successful replaces
    pub fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Vec<Slot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        if self.yield_on_access.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn load_fails(&self, location_id: i32) -> bool {
        self.fail_loads.load(Ordering::SeqCst)
            || self
                .failing_locations
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&location_id)
    }

    fn transient(operation: &str) -> CacheError {
        CacheError::Transient {
            backend: BackendKind::Blob,
            reason: format!("{} timed out", operation),
        }
    }
}

#[async_trait]
impl AvailabilityStore for MemoryStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Blob
    }

    async fn load_window(&self, window: &Window, _trace: &TraceId) -> Result<Vec<Slot>, CacheError> {
        self.pause().await;
        if self.load_fails(window.location_id) {
            return Err(Self::transient("load"));
        }
        Ok(self
            .snapshot(window.location_id)
            .into_iter()
            .filter(|s| window.contains(&s.timestamp))
            .collect())
    }

    async fn replace_window(
        &self,
        window: &Window,
        slots: &[Slot],
        _trace: &TraceId,
    ) -> Result<(), CacheError> {
        self.pause().await;
        if self.fail_replaces.load(Ordering::SeqCst) {
            return Err(Self::transient("replace"));
        }
        let mut map = self.lock();
        let stored = map.entry(window.location_id).or_default();
        stored.retain(|s| !window.contains(&s.timestamp));
        stored.extend(
            slots
                .iter()
                .filter(|s| s.location_id == window.location_id && window.contains(&s.timestamp))
                .cloned(),
        );
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self, location_id: i32, _trace: &TraceId) -> Result<(), CacheError> {
        self.lock().remove(&location_id);
        Ok(())
    }
}

/// Slot at `timestamp` (`%Y-%m-%dT%H:%M:%S`) with three places, none pending
pub fn slot_at(location_id: i32, timestamp: &str, openings: u32) -> Slot {
    let timestamp = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S")
        .unwrap_or_else(|e| panic!("bad test timestamp {}: {}", timestamp, e));
    Slot {
        location_id,
        timestamp,
        openings,
        total_slots: 3,
        pending: 0,
        conflicts: 0,
        duration_minutes: 10,
    }
}

/// Seven days of 10-minute slots from 08:00 to 18:00, sixty per day
pub fn dense_week(location_id: i32, start: NaiveDate) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(7 * 60);
    for day in start.iter_days().take(7) {
        let opening = day.and_time(NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN));
        for i in 0..60 {
            slots.push(Slot {
                location_id,
                timestamp: opening + Duration::minutes(i * 10),
                openings: (i % 3) as u32 + 1,
                total_slots: 3,
                pending: (i % 2) as u32,
                conflicts: 0,
                duration_minutes: 10,
            });
        }
    }
    slots
}

/// Assert two slot lists match field by field, in order
pub fn assert_same_slots(actual: &[Slot], expected: &[Slot]) {
    assert_eq!(actual.len(), expected.len(), "slot counts differ");
    for (a, e) in actual.iter().zip(expected) {
        assert_eq!(a.location_id, e.location_id);
        assert_eq!(a.timestamp, e.timestamp);
        assert_eq!(a.openings, e.openings, "openings differ at {}", e.timestamp);
        assert_eq!(a.total_slots, e.total_slots);
        assert_eq!(a.pending, e.pending);
        assert_eq!(a.conflicts, e.conflicts);
        assert_eq!(a.duration_minutes, e.duration_minutes);
    }
}
