use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

const BASE36_CHARS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const GROUP_LEN: usize = 5;
const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;

/// Correlation id for one cycle or one queue message.
///
/// Encodes the 100ns ticks elapsed since 2024-07-01 UTC in base 36, grouped
/// in fives with dashes, e.g. `1b2c3-d4e5f-g`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// Generate an id for the current instant
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    /// Generate the id that corresponds to `instant`
    pub fn at(instant: DateTime<Utc>) -> Self {
        let elapsed = instant - epoch();
        let ticks = elapsed.num_seconds() * TICKS_PER_SECOND
            + i64::from(elapsed.subsec_nanos()) / NANOS_PER_TICK;
        let encoded = to_base36(u64::try_from(ticks).unwrap_or(0));
        Self(insert_dashes(&encoded))
    }

    /// Wrap an id received from elsewhere (e.g. a queue message attribute)
    pub fn from_existing(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Recover the instant an id was generated at, if it is well formed
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        let ticks = i64::try_from(from_base36(&self.0.replace('-', ""))?).ok()?;
        let seconds = ticks / TICKS_PER_SECOND;
        let nanos = (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;
        Some(epoch() + chrono::Duration::seconds(seconds) + chrono::Duration::nanoseconds(nanos))
    }

    /// The id text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_CHARS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

fn from_base36(text: &str) -> Option<u64> {
    if text.is_empty() {
        return None;
    }

    text.to_ascii_lowercase().bytes().try_fold(0u64, |acc, byte| {
        let digit = BASE36_CHARS.iter().position(|c| *c == byte)?;
        acc.checked_mul(36)?.checked_add(digit as u64)
    })
}

fn insert_dashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / GROUP_LEN);
    for (i, c) in input.chars().enumerate() {
        if i > 0 && i % GROUP_LEN == 0 {
            out.push('-');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36_roundtrip() {
        for value in [0u64, 1, 35, 36, 1_295, 46_656, 123_456_789_012] {
            assert_eq!(from_base36(&to_base36(value)), Some(value));
        }
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_dashes_every_five_characters() {
        assert_eq!(insert_dashes("abcde"), "abcde");
        assert_eq!(insert_dashes("abcdef"), "abcde-f");
        assert_eq!(insert_dashes("abcdefghijk"), "abcde-fghij-k");
    }

    #[test]
    fn test_issued_at_recovers_instant() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let id = TraceId::at(instant);

        assert!(!id.as_str().is_empty());
        assert_eq!(id.issued_at(), Some(instant));
    }

    #[test]
    fn test_later_ids_differ() {
        let a = TraceId::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let b = TraceId::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_id_has_no_instant() {
        assert_eq!(TraceId::from_existing("not an id!").issued_at(), None);
        assert_eq!(TraceId::from_existing("").issued_at(), None);
    }
}
