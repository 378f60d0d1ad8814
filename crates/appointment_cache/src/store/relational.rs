use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use postgres::database::AVAILABILITY_TABLE;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{AvailabilityStore, BackendKind, Clock, local_now};
use crate::config::SqlConfig;
use crate::error::CacheError;
use crate::retry::{ErrorClass, RetryPolicy, classify, with_retry};
use crate::slot::{Slot, Window};
use crate::trace::TraceId;

/// Rows per multi-row INSERT statement
const INSERT_BATCH_SIZE: usize = 1000;

const COLUMNS: &str =
    "location_id, slot_time, openings, total_slots, pending, conflicts, duration_minutes";

fn insert_prefix() -> String {
    format!("INSERT INTO {} ({}) ", AVAILABILITY_TABLE, COLUMNS)
}

fn select_window_sql() -> String {
    format!(
        "SELECT {} FROM {} \
         WHERE location_id = $1 AND slot_time >= $2 AND slot_time < $3 \
         ORDER BY slot_time",
        COLUMNS, AVAILABILITY_TABLE
    )
}

/// Delete statement for a window replace, with or without the lower bound
fn delete_window_sql(bounded: bool) -> String {
    if bounded {
        format!(
            "DELETE FROM {} WHERE location_id = $1 AND slot_time >= $2 AND slot_time < $3",
            AVAILABILITY_TABLE
        )
    } else {
        format!(
            "DELETE FROM {} WHERE location_id = $1 AND slot_time < $2",
            AVAILABILITY_TABLE
        )
    }
}

fn clear_sql() -> String {
    format!("DELETE FROM {} WHERE location_id = $1", AVAILABILITY_TABLE)
}

/// One row of `appointment_availability`
#[derive(Debug, Clone, sqlx::FromRow)]
struct AvailabilityRow {
    location_id: i32,
    slot_time: NaiveDateTime,
    openings: i32,
    total_slots: i32,
    pending: i32,
    conflicts: i32,
    duration_minutes: i32,
}

impl AvailabilityRow {
    fn from_slot(slot: &Slot) -> Result<Self, CacheError> {
        Ok(Self {
            location_id: slot.location_id,
            slot_time: slot.timestamp,
            openings: to_column(slot.openings, "openings")?,
            total_slots: to_column(slot.total_slots, "total_slots")?,
            pending: to_column(slot.pending, "pending")?,
            conflicts: to_column(slot.conflicts, "conflicts")?,
            duration_minutes: to_column(slot.duration_minutes, "duration_minutes")?,
        })
    }
}

impl TryFrom<AvailabilityRow> for Slot {
    type Error = CacheError;

    fn try_from(row: AvailabilityRow) -> Result<Self, Self::Error> {
        Ok(Slot {
            location_id: row.location_id,
            timestamp: row.slot_time,
            openings: from_column(row.openings, "openings")?,
            total_slots: from_column(row.total_slots, "total_slots")?,
            pending: from_column(row.pending, "pending")?,
            conflicts: from_column(row.conflicts, "conflicts")?,
            duration_minutes: from_column(row.duration_minutes, "duration_minutes")?,
        })
    }
}

fn to_column(value: u32, column: &str) -> Result<i32, CacheError> {
    i32::try_from(value).map_err(|_| persistent(format!("{} value {} out of range", column, value)))
}

fn from_column(value: i32, column: &str) -> Result<u32, CacheError> {
    u32::try_from(value).map_err(|_| persistent(format!("{} value {} is negative", column, value)))
}

/// Availability kept as one row per slot in PostgreSQL.
///
/// Every statement is retried on timeouts and dropped connections. A window
/// replace runs its delete and inserts in one transaction.
pub struct RelationalStore {
    pool: PgPool,
    retry: RetryPolicy,
    clock: Clock,
}

impl RelationalStore {
    /// Open a pool, check it and make sure the table exists
    pub async fn connect(config: &SqlConfig) -> Result<Self, CacheError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| unavailable("no connection URL configured"))?;

        let pool = postgres::database::create_connection_pool(url, config.acquire_timeout)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        postgres::database::test_connection(&pool)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        postgres::database::ensure_availability_schema(&pool)
            .await
            .map_err(sql_error)?;

        Ok(Self::from_pool(pool, config.retry))
    }

    /// Wrap an existing pool; the table must already exist
    pub fn from_pool(pool: PgPool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            clock: local_now,
        }
    }

    /// Replace the clock used to decide how much history a replace deletes
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    async fn delete_and_insert(
        &self,
        window: &Window,
        rows: &[AvailabilityRow],
        lower: Option<NaiveDateTime>,
    ) -> Result<(), sqlx::Error> {
        let upper = day_after(window.end_date);
        let mut tx = self.pool.begin().await?;

        let delete = delete_window_sql(lower.is_some());
        match lower {
            Some(lower) => {
                sqlx::query(&delete)
                .bind(window.location_id)
                .bind(lower)
                .bind(upper)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(&delete)
                .bind(window.location_id)
                .bind(upper)
                .execute(&mut *tx)
                .await?;
            }
        }

        for chunk in rows.chunks(INSERT_BATCH_SIZE) {
            let mut builder = QueryBuilder::<Postgres>::new(insert_prefix());
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.location_id)
                    .push_bind(row.slot_time)
                    .push_bind(row.openings)
                    .push_bind(row.total_slots)
                    .push_bind(row.pending)
                    .push_bind(row.conflicts)
                    .push_bind(row.duration_minutes);
            });
            builder.push(" ON CONFLICT (location_id, slot_time) DO NOTHING");
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }
}

/// Lower bound for the delete issued by a window replace.
///
/// When the window starts tomorrow or earlier, everything up to the window
/// end is deleted so stale past rows go with it; only windows starting
/// further out keep a lower bound.
pub fn delete_lower_bound(start_date: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    let day_before = start_date.checked_sub_days(Days::new(1))?;
    (day_before > today).then_some(start_date)
}

fn day_after(date: NaiveDate) -> NaiveDateTime {
    date.succ_opt().unwrap_or(date).and_time(NaiveTime::MIN)
}

#[async_trait]
impl AvailabilityStore for RelationalStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn load_window(&self, window: &Window, trace: &TraceId) -> Result<Vec<Slot>, CacheError> {
        let pool = &self.pool;
        let lower = window.start_date.and_time(NaiveTime::MIN);
        let upper = day_after(window.end_date);
        let sql = select_window_sql();

        let rows: Vec<AvailabilityRow> = with_retry(&self.retry, trace, "Load window", classify, || {
            sqlx::query_as::<_, AvailabilityRow>(&sql)
            .bind(window.location_id)
            .bind(lower)
            .bind(upper)
            .fetch_all(pool)
        })
        .await
        .map_err(sql_error)?;

        debug!(trace_id = %trace, "Loaded {} cached rows for {}", rows.len(), window);
        rows.into_iter().map(Slot::try_from).collect()
    }

    async fn replace_window(
        &self,
        window: &Window,
        slots: &[Slot],
        trace: &TraceId,
    ) -> Result<(), CacheError> {
        let rows = slots
            .iter()
            .filter(|s| s.location_id == window.location_id && window.contains(&s.timestamp))
            .map(AvailabilityRow::from_slot)
            .collect::<Result<Vec<_>, _>>()?;

        let today = (self.clock)().date();
        let lower = delete_lower_bound(window.start_date, today).map(|d| d.and_time(NaiveTime::MIN));

        with_retry(&self.retry, trace, "Replace window", classify, || {
            self.delete_and_insert(window, &rows, lower)
        })
        .await
        .map_err(sql_error)?;

        info!(trace_id = %trace, "{} slots cached to database for {}", rows.len(), window);
        Ok(())
    }

    async fn clear(&self, location_id: i32, trace: &TraceId) -> Result<(), CacheError> {
        let pool = &self.pool;
        let sql = clear_sql();
        let result = with_retry(&self.retry, trace, "Clear location", classify, || {
            sqlx::query(&sql)
                .bind(location_id)
                .execute(pool)
        })
        .await
        .map_err(sql_error)?;

        info!(trace_id = %trace, "Deleted {} cached rows for location {}", result.rows_affected(), location_id);
        Ok(())
    }
}

fn unavailable(reason: impl Into<String>) -> CacheError {
    CacheError::StoreUnavailable {
        backend: BackendKind::Relational,
        reason: reason.into(),
    }
}

fn persistent(reason: impl Into<String>) -> CacheError {
    CacheError::Persistent {
        backend: BackendKind::Relational,
        reason: reason.into(),
    }
}

fn sql_error(err: sqlx::Error) -> CacheError {
    match classify(&err) {
        ErrorClass::Transient => CacheError::Transient {
            backend: BackendKind::Relational,
            reason: err.to_string(),
        },
        ErrorClass::Permanent => persistent(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::testing::{assert_same_slots, dense_week, slot_at};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[rstest]
    #[case("2024-07-10", "2024-07-09", None)]
    #[case("2024-07-11", "2024-07-09", Some("2024-07-11"))]
    #[case("2024-07-09", "2024-07-09", None)]
    #[case("2024-07-20", "2024-07-09", Some("2024-07-20"))]
    fn test_delete_lower_bound(
        #[case] start: &str,
        #[case] today: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(delete_lower_bound(date(start), date(today)), expected.map(date));
    }

    #[test]
    fn test_row_conversion_keeps_every_field() {
        let slot = slot_at(5020, "2024-07-10T08:30:00", 2);
        let row = AvailabilityRow::from_slot(&slot).unwrap();
        assert_eq!(row.openings, 2);
        assert_eq!(row.slot_time, slot.timestamp);

        let back = Slot::try_from(row).unwrap();
        assert_same_slots(&[back], &[slot]);
    }

    #[test]
    fn test_negative_column_is_rejected() {
        let mut row = AvailabilityRow::from_slot(&slot_at(5020, "2024-07-10T08:30:00", 1)).unwrap();
        row.pending = -1;
        assert!(matches!(
            Slot::try_from(row),
            Err(CacheError::Persistent {
                backend: BackendKind::Relational,
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_count_is_rejected() {
        let mut slot = slot_at(5020, "2024-07-10T08:30:00", 1);
        slot.total_slots = u32::MAX;
        assert!(AvailabilityRow::from_slot(&slot).is_err());
    }

    #[test]
    fn test_pool_timeout_maps_to_transient() {
        assert!(matches!(
            sql_error(sqlx::Error::PoolTimedOut),
            CacheError::Transient { .. }
        ));
        assert!(matches!(
            sql_error(sqlx::Error::RowNotFound),
            CacheError::Persistent { .. }
        ));
    }

    #[test]
    fn test_statements_target_availability_table() {
        for sql in [
            insert_prefix(),
            select_window_sql(),
            delete_window_sql(true),
            delete_window_sql(false),
            clear_sql(),
        ] {
            assert!(sql.contains(AVAILABILITY_TABLE), "{}", sql);
        }
        assert!(delete_window_sql(true).ends_with("slot_time >= $2 AND slot_time < $3"));
        assert!(delete_window_sql(false).ends_with("location_id = $1 AND slot_time < $2"));
        assert!(select_window_sql().ends_with("ORDER BY slot_time"));
    }

    /// Runs only when `TEST_DATABASE_URL` points at a scratch database
    #[tokio::test]
    async fn test_roundtrip_against_database() {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            return;
        };
        let config = SqlConfig {
            enabled: true,
            url: Some(url),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
            acquire_timeout: Duration::from_secs(5),
        };
        let store = RelationalStore::connect(&config).await.unwrap();
        let trace = TraceId::generate();
        let location = 990_001;
        let start = (local_now() + chrono::Duration::days(3)).date();
        let window = Window::starting(location, start, 7).unwrap();

        store.clear(location, &trace).await.unwrap();
        let slots = dense_week(location, start);
        store.replace_window(&window, &slots, &trace).await.unwrap();
        let loaded = store.load_window(&window, &trace).await.unwrap();
        assert_same_slots(&loaded, &slots);

        store.replace_window(&window, &slots[..10], &trace).await.unwrap();
        assert_eq!(store.load_window(&window, &trace).await.unwrap().len(), 10);

        store.clear(location, &trace).await.unwrap();
        assert!(store.load_window(&window, &trace).await.unwrap().is_empty());
    }
}
