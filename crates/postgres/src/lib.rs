//! # Postgres
//!
//! Connection pooling and schema setup for the appointment availability table.

/// Pool construction, connectivity check and schema bootstrap
pub mod database;
