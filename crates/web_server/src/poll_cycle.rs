use std::collections::HashSet;
use std::sync::Arc;

use appointment_cache::store::{Clock, local_now};
use appointment_cache::{
    AvailabilityStore, BackendKind, CacheError, ChangeDetectionSession, Slot, StoreProvider,
    TraceId, Window,
};
use chrono::{Days, NaiveDateTime};
use notification_services::{NotificationError, QueuePublisher, chunk_for_queue};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use ttp_scheduler::{SlotSource, SourceError};

use crate::config::PollerConfig;

/// Why polling a location stopped
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// Appointment source failed
    #[error("Appointment source error: {0}")]
    Source(#[from] SourceError),

    /// Cache load or replace failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Publishing new slots failed
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// Batch could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome for one location
#[derive(Debug, Clone)]
pub struct LocationReport {
    /// Window that was polled
    pub window: Window,
    /// Slots with at least one opening
    pub open_slots: Vec<Slot>,
    /// Open slots absent from the previous snapshot
    pub new_slots: Vec<Slot>,
    /// Queue messages sent
    pub batches_published: usize,
    /// Whether the snapshot was replaced
    pub cached: bool,
}

/// A location whose poll stopped with an error
#[derive(Debug)]
pub struct LocationFailure {
    /// Window that was being polled
    pub window: Window,
    /// What went wrong
    pub error: CycleError,
}

/// Outcome of a whole cycle
#[derive(Debug)]
pub struct CycleReport {
    /// Correlation id of the cycle
    pub trace_id: TraceId,
    /// Days covered by each window
    pub window_days: u32,
    /// Backend used, `None` in no-cache mode
    pub backend: Option<BackendKind>,
    /// Local time the cycle started
    pub started_at: NaiveDateTime,
    /// Locations polled successfully, in configuration order
    pub locations: Vec<LocationReport>,
    /// Locations whose poll failed, in configuration order
    pub failures: Vec<LocationFailure>,
}

impl CycleReport {
    /// Whether every location was polled successfully
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Open slots across every location
    pub fn open_slots(&self) -> impl Iterator<Item = &Slot> {
        self.locations.iter().flat_map(|l| l.open_slots.iter())
    }

    /// Number of new slots across every location
    pub fn new_count(&self) -> usize {
        self.locations.iter().map(|l| l.new_slots.len()).sum()
    }

    /// Plain-text summary returned by the trigger endpoint
    pub fn summary(&self) -> String {
        let slots: Vec<&Slot> = self.open_slots().collect();
        let details = slots
            .iter()
            .map(|s| s.details())
            .collect::<Vec<_>>()
            .join("\n");

        match slots.len() {
            0 => format!(
                "No appointments available for the next {} days as of {}.",
                self.window_days,
                self.started_at.format("%-m-%-d-%Y %-I:%M:%S %p")
            ),
            1 => format!(
                "One appointment found within the next {} days:\n{}",
                self.window_days, details
            ),
            n => format!(
                "{} appointments found within the next {} days:\n{}",
                n, self.window_days, details
            ),
        }
    }
}

/// Runs poll cycles: fetch, diff against the cache, publish, replace
pub struct AppointmentPoller {
    source: Arc<dyn SlotSource>,
    stores: Arc<dyn StoreProvider>,
    publisher: Option<Arc<dyn QueuePublisher>>,
    settings: PollerConfig,
    queue_max_bytes: usize,
    clock: Clock,
    running: Mutex<()>,
}

impl AppointmentPoller {
    /// Create a poller; `publisher` is `None` when the queue is disabled
    pub fn new(
        source: Arc<dyn SlotSource>,
        stores: Arc<dyn StoreProvider>,
        publisher: Option<Arc<dyn QueuePublisher>>,
        settings: PollerConfig,
        queue_max_bytes: usize,
    ) -> Self {
        Self {
            source,
            stores,
            publisher,
            settings,
            queue_max_bytes,
            clock: local_now,
            running: Mutex::new(()),
        }
    }

    /// Replace the clock used to place the window
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one cycle over every configured location.
    ///
    /// Cycles on one poller never overlap; a call waits for the running one
    /// to finish. A store that cannot be created puts the cycle in no-cache
    /// mode. Each location is handled on its own: a failure is logged and
    /// recorded in the report, and the remaining locations are still polled.
    pub async fn run_cycle(&self, trace: &TraceId) -> Result<CycleReport, CycleError> {
        let _running = self.running.lock().await;
        let started_at = (self.clock)();
        let tomorrow = started_at
            .date()
            .checked_add_days(Days::new(1))
            .unwrap_or(started_at.date());

        let store = match self.stores.create(trace).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(trace_id = %trace, "Running without cache: {}", e);
                None
            }
        };

        let mut report = CycleReport {
            trace_id: trace.clone(),
            window_days: self.settings.window_days,
            backend: store.as_ref().map(|s| s.backend()),
            started_at,
            locations: Vec::with_capacity(self.settings.location_ids.len()),
            failures: Vec::new(),
        };

        for &location_id in &self.settings.location_ids {
            let window = Window::starting(location_id, tomorrow, self.settings.window_days)?;
            let location = match self.poll_location(&window, store.clone(), trace).await {
                Ok(location) => location,
                Err(e) => {
                    error!(trace_id = %trace, "Polling {} failed: {}", window, e);
                    report.failures.push(LocationFailure { window, error: e });
                    continue;
                }
            };
            debug!(
                trace_id = %trace,
                "{}: {} open, {} new, {} batches, cached: {}",
                location.window,
                location.open_slots.len(),
                location.new_slots.len(),
                location.batches_published,
                location.cached
            );
            report.locations.push(location);
        }

        info!(
            trace_id = %trace,
            "Cycle complete: {} open slots, {} new, {} locations polled, {} failed ({} cache)",
            report.open_slots().count(),
            report.new_count(),
            report.locations.len(),
            report.failures.len(),
            report
                .backend
                .map_or_else(|| "no".to_string(), |b| b.to_string())
        );
        Ok(report)
    }

    async fn poll_location(
        &self,
        window: &Window,
        store: Option<Arc<dyn AvailabilityStore>>,
        trace: &TraceId,
    ) -> Result<LocationReport, CycleError> {
        info!(trace_id = %trace, "Polling {}", window);

        let mut seen = HashSet::new();
        let open_slots: Vec<Slot> = self
            .source
            .fetch_slots(window, trace)
            .await?
            .into_iter()
            .filter(|s| {
                s.location_id == window.location_id
                    && window.contains(&s.timestamp)
                    && s.openings > 0
                    && seen.insert(s.identity_key())
            })
            .collect();
        debug!(trace_id = %trace, "{} distinct open slots in {}", open_slots.len(), window);

        let mut session = ChangeDetectionSession::new(store.clone());
        session.begin(window, trace).await?;

        let mut new_slots = Vec::new();
        for slot in &open_slots {
            if session.is_new(slot)? {
                new_slots.push(slot.clone());
            }
        }
        session.finish();

        let batches_published = self.publish(&new_slots, trace).await?;

        let cached = match (&store, self.settings.cache_available_slots) {
            (Some(store), true) => {
                store.replace_window(window, &open_slots, trace).await?;
                true
            }
            (None, true) => {
                debug!(trace_id = %trace, "No cache store, snapshot not replaced");
                false
            }
            (_, false) => {
                info!(trace_id = %trace, "Caching of available slots is disabled");
                false
            }
        };

        Ok(LocationReport {
            window: *window,
            open_slots,
            new_slots,
            batches_published,
            cached,
        })
    }

    async fn publish(&self, new_slots: &[Slot], trace: &TraceId) -> Result<usize, CycleError> {
        if new_slots.is_empty() {
            info!(trace_id = %trace, "No new appointments found");
            return Ok(0);
        }

        let Some(publisher) = &self.publisher else {
            info!(
                trace_id = %trace,
                "Queue is disabled, not publishing {} new appointments",
                new_slots.len()
            );
            return Ok(0);
        };

        let batches = chunk_for_queue(new_slots, self.queue_max_bytes, trace)?;
        for batch in &batches {
            publisher.publish(&batch.payload, trace).await?;
        }

        info!(
            trace_id = %trace,
            "Published {} new appointments in {} batches",
            new_slots.len(),
            batches.len()
        );
        Ok(batches.len())
    }
}
