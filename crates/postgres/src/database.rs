use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

/// Name of the table holding one row per cached slot
pub const AVAILABILITY_TABLE: &str = "appointment_availability";

/// Creates a connection pool to the PostgreSQL database.
pub async fn create_connection_pool(
    database_url: &str,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Tests the database connection by executing a simple query.
pub async fn test_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    let row = sqlx::query("SELECT 1 as test").fetch_one(pool).await?;

    let test_value: i32 = row.get("test");
    info!("Database connection successful, test value: {}", test_value);

    Ok(())
}

/// DDL for the availability table.
///
/// A slot is identified by its location and start time, so those form the
/// primary key.
pub fn availability_schema_sql() -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            location_id INTEGER NOT NULL,
            slot_time TIMESTAMP NOT NULL,
            openings INTEGER NOT NULL,
            total_slots INTEGER NOT NULL,
            pending INTEGER NOT NULL,
            conflicts INTEGER NOT NULL,
            duration_minutes INTEGER NOT NULL,
            PRIMARY KEY (location_id, slot_time)
        )
        "#,
        AVAILABILITY_TABLE
    )
}

/// Creates the availability table if it does not exist yet.
pub async fn ensure_availability_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(&availability_schema_sql()).execute(pool).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_uses_table_name_and_slot_key() {
        let sql = availability_schema_sql();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS appointment_availability ("));
        assert!(sql.contains("PRIMARY KEY (location_id, slot_time)"));
    }
}
