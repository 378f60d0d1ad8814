//! # TTP Scheduler
//!
//! Client for the public appointment scheduler API. Fetches the slots of a
//! location for a date window and converts them into [`Slot`] values.
//!
//! [`Slot`]: appointment_cache::Slot

/// HTTP client and the `SlotSource` seam used by the poll cycle
mod client;
pub use client::*;

/// Raw scheduler entries and their conversion to slots
mod converter;
pub use converter::*;

/// Errors raised while fetching availability
mod error;
pub use error::*;
