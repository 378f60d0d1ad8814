use std::time::Duration;

/// Budgets and thresholds used when batching and sending notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Largest queue message body in bytes (default: 256 KiB)
    pub queue_max_bytes: usize,
    /// Largest SMS body in characters (default: 160)
    pub sms_max_chars: usize,
    /// Up to this many slots get the short, one-line-per-slot SMS (default: 5)
    pub max_short_notifications: usize,
    /// Pause after this many successful SMS sends (default: 25)
    pub sms_throttle_every: usize,
    /// Length of that pause (default: 1 second)
    pub sms_throttle_pause: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_max_bytes: 256 * 1024,
            sms_max_chars: 160,
            max_short_notifications: 5,
            sms_throttle_every: 25,
            sms_throttle_pause: Duration::from_millis(1000),
        }
    }
}
