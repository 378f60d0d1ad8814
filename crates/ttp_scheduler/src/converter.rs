use appointment_cache::Slot;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::warn;

/// Timestamp layouts the scheduler has been seen to return
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

/// One entry of the scheduler's slot listing
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSlot {
    /// Local start time, e.g. `2024-07-23T08:00`
    pub timestamp: String,
    /// Open places
    pub active: u32,
    /// Total places
    pub total: u32,
    /// Places held by pending bookings
    #[serde(default)]
    pub pending: u32,
    /// Conflicting bookings
    #[serde(default)]
    pub conflicts: u32,
    /// Appointment length in minutes
    pub duration: u32,
    /// Whether the appointment is held remotely
    #[serde(default)]
    pub remote: bool,
}

impl SchedulerSlot {
    /// Convert to a slot at `location_id`, `None` when the timestamp is unreadable
    pub fn into_slot(self, location_id: i32) -> Option<Slot> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        Some(Slot {
            location_id,
            timestamp,
            openings: self.active,
            total_slots: self.total,
            pending: self.pending,
            conflicts: self.conflicts,
            duration_minutes: self.duration,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

/// Decode a scheduler response body into slots for `location_id`.
///
/// Entries with an unreadable timestamp are skipped; a body that is not a
/// JSON array of entries is an error.
pub fn convert_slots(body: &str, location_id: i32) -> Result<Vec<Slot>, serde_json::Error> {
    let entries: Vec<SchedulerSlot> = serde_json::from_str(body)?;
    let total = entries.len();

    let slots: Vec<Slot> = entries
        .into_iter()
        .filter_map(|entry| {
            let raw = entry.timestamp.clone();
            let slot = entry.into_slot(location_id);
            if slot.is_none() {
                warn!("Skipping slot with unreadable timestamp {:?}", raw);
            }
            slot
        })
        .collect();

    if slots.len() < total {
        warn!("{} of {} scheduler entries skipped", total - slots.len(), total);
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const SAMPLE: &str = r#"[
        {"active":1,"total":3,"pending":0,"conflicts":0,"duration":10,"timestamp":"2024-07-23T08:00","remote":false},
        {"active":0,"total":3,"pending":2,"conflicts":1,"duration":10,"timestamp":"2024-07-23T08:10","remote":false},
        {"active":2,"total":3,"pending":0,"conflicts":0,"duration":15,"timestamp":"2024-07-24T13:30:00","remote":true}
    ]"#;

    #[test]
    fn test_convert_sample_response() {
        let slots = convert_slots(SAMPLE, 5020).unwrap();

        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.location_id == 5020));
        assert_eq!(slots[0].identity_key(), "5020-2024-07-23T08:00");
        assert_eq!(slots[0].openings, 1);
        assert_eq!(slots[1].pending, 2);
        assert_eq!(slots[1].conflicts, 1);
        assert_eq!(slots[2].duration_minutes, 15);
        assert_eq!(slots[2].identity_key(), "5020-2024-07-24T13:30");
    }

    #[rstest]
    #[case("2024-07-23T08:00", true)]
    #[case("2024-07-23T08:00:00", true)]
    #[case("23/07/2024 08:00", false)]
    #[case("", false)]
    fn test_parse_timestamp(#[case] value: &str, #[case] parses: bool) {
        assert_eq!(parse_timestamp(value).is_some(), parses);
    }

    #[test]
    fn test_unreadable_timestamps_are_skipped() {
        let body = r#"[
            {"active":1,"total":1,"duration":10,"timestamp":"soon"},
            {"active":1,"total":1,"duration":10,"timestamp":"2024-07-23T09:00"}
        ]"#;
        let slots = convert_slots(body, 5020).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].pending, 0);
    }

    #[test]
    fn test_empty_listing() {
        assert!(convert_slots("[]", 5020).unwrap().is_empty());
    }

    #[test]
    fn test_non_array_body_is_an_error() {
        assert!(convert_slots(r#"{"error":"maintenance"}"#, 5020).is_err());
    }
}
