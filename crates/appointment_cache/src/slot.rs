use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Format used for the minute-precision part of a slot's identity key
pub const IDENTITY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// One appointment opportunity at a location.
///
/// Equality and hashing only consider `location_id` and `timestamp`; the
/// capacity fields are payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Facility identifier
    pub location_id: i32,
    /// Slot start, in the facility's local time
    pub timestamp: NaiveDateTime,
    /// Open places left in this slot
    pub openings: u32,
    /// Total places in this slot
    pub total_slots: u32,
    /// Places held by pending bookings
    pub pending: u32,
    /// Conflicting bookings
    pub conflicts: u32,
    /// Appointment length in minutes
    pub duration_minutes: u32,
}

impl Slot {
    /// Key that identifies this slot within a snapshot: `"{location}-{yyyy-MM-ddTHH:mm}"`
    pub fn identity_key(&self) -> String {
        format!(
            "{}-{}",
            self.location_id,
            self.timestamp.format(IDENTITY_TIME_FORMAT)
        )
    }

    /// Calendar date the slot starts on
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Single-line description used in logs and trigger responses
    pub fn details(&self) -> String {
        format!(
            "Location: {}, Date: {}, Openings: {}, TotalSlots: {}, Pending: {}, Conflicts: {}, Duration: {}",
            self.location_id,
            self.timestamp.format(IDENTITY_TIME_FORMAT),
            self.openings,
            self.total_slots,
            self.pending,
            self.conflicts,
            self.duration_minutes
        )
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.location_id == other.location_id && self.timestamp == other.timestamp
    }
}

impl Eq for Slot {}

impl Hash for Slot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location_id.hash(state);
        self.timestamp.hash(state);
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.details())
    }
}

/// A location plus an inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Facility the window belongs to
    pub location_id: i32,
    /// First date in the window
    pub start_date: NaiveDate,
    /// Last date in the window, inclusive
    pub end_date: NaiveDate,
}

impl Window {
    /// Create a window, rejecting ranges that end before they start
    pub fn new(
        location_id: i32,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self, CacheError> {
        if end_date < start_date {
            return Err(CacheError::InvalidWindow {
                start: start_date,
                end: end_date,
            });
        }

        Ok(Self {
            location_id,
            start_date,
            end_date,
        })
    }

    /// Window covering `days` calendar days beginning at `start_date`
    pub fn starting(location_id: i32, start_date: NaiveDate, days: u32) -> Result<Self, CacheError> {
        let span = i64::from(days.max(1)) - 1;
        Self::new(location_id, start_date, start_date + Duration::days(span))
    }

    /// Whether a timestamp falls on one of the window's dates
    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        let date = timestamp.date();
        date >= self.start_date && date <= self.end_date
    }

    /// Every calendar date in the window, in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start_date
            .iter_days()
            .take_while(move |date| *date <= self.end_date)
    }

    /// Number of calendar days covered
    pub fn len_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "location {} from {} to {}",
            self.location_id, self.start_date, self.end_date
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_at(location_id: i32, timestamp: &str, openings: u32) -> Slot {
        Slot {
            location_id,
            timestamp: NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S").unwrap(),
            openings,
            total_slots: 3,
            pending: 0,
            conflicts: 0,
            duration_minutes: 10,
        }
    }

    #[test]
    fn test_identity_key_format() {
        let slot = slot_at(5020, "2024-07-10T08:30:00", 1);
        assert_eq!(slot.identity_key(), "5020-2024-07-10T08:30");
    }

    #[test]
    fn test_identity_ignores_payload() {
        let a = slot_at(1234, "2024-07-10T08:00:00", 1);
        let mut b = slot_at(1234, "2024-07-10T08:00:00", 3);
        b.pending = 2;
        b.duration_minutes = 15;

        assert_eq!(a.identity_key(), b.identity_key());
        assert_eq!(a, b);

        let c = slot_at(1235, "2024-07-10T08:00:00", 1);
        assert_ne!(a.identity_key(), c.identity_key());
        assert_ne!(a, c);
    }

    #[test]
    fn test_slot_serializes_camel_case() {
        let slot = slot_at(1234, "2024-07-10T08:00:00", 1);
        let json = serde_json::to_value(&slot).unwrap();

        assert_eq!(json["locationId"], 1234);
        assert_eq!(json["totalSlots"], 3);
        assert_eq!(json["durationMinutes"], 10);
        assert_eq!(json["timestamp"], "2024-07-10T08:00:00");
    }

    #[test]
    fn test_details_lists_all_fields() {
        let slot = slot_at(1234, "2024-07-10T08:00:00", 1);
        assert_eq!(
            slot.details(),
            "Location: 1234, Date: 2024-07-10T08:00, Openings: 1, TotalSlots: 3, Pending: 0, Conflicts: 0, Duration: 10"
        );
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let start = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 7, 9).unwrap();
        assert!(matches!(
            Window::new(1, start, end),
            Err(CacheError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_window_days_and_contains() {
        let start = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let window = Window::starting(1, start, 7).unwrap();

        assert_eq!(window.end_date, NaiveDate::from_ymd_opt(2024, 7, 16).unwrap());
        assert_eq!(window.days().count(), 7);
        assert_eq!(window.len_days(), 7);

        let last_evening = slot_at(1, "2024-07-16T23:50:00", 1);
        let after = slot_at(1, "2024-07-17T00:00:00", 1);
        let before = slot_at(1, "2024-07-09T23:59:00", 1);
        assert!(window.contains(&last_evening.timestamp));
        assert!(!window.contains(&after.timestamp));
        assert!(!window.contains(&before.timestamp));
    }
}
