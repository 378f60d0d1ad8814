use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use appointment_cache::{Slot, TraceId};
use chrono::{NaiveDate, NaiveDateTime};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::transport::SmsSender;

const SLOT_FORMAT: &str = "%a %-m/%-d/%y %-I:%M %p";
const DATE_FORMAT: &str = "%a %-m/%-d/%y";
const TIME_FORMAT: &str = "%-I:%M %p";

/// Which message layout was chosen for a set of slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsStrategy {
    /// One line per slot with its date and time
    Short,
    /// One line per date with summed openings and the earliest time
    Grouped,
}

/// Pick the layout for `slots` and render the messages to send.
///
/// Every recipient gets every returned message.
pub fn compose_sms(
    slots: &[Slot],
    location_label: &str,
    config: &NotifierConfig,
) -> (SmsStrategy, Vec<String>) {
    if slots.is_empty() {
        return (SmsStrategy::Short, Vec::new());
    }

    if slots.len() <= config.max_short_notifications {
        (SmsStrategy::Short, vec![short_message(slots, location_label)])
    } else {
        (
            SmsStrategy::Grouped,
            grouped_messages(slots, config.sms_max_chars),
        )
    }
}

/// Header, one line per slot, then the location
pub fn short_message(slots: &[Slot], location_label: &str) -> String {
    let mut message = String::from("Appointment found:\n");
    for slot in slots {
        message.push_str(&slot.timestamp.format(SLOT_FORMAT).to_string());
        message.push('\n');
    }
    message.push_str(location_label);
    message
}

/// One `"{date}: {sum} opening(s) starting at {time}"` line per date, in date order
pub fn date_lines(slots: &[Slot]) -> Vec<String> {
    let mut by_date: BTreeMap<NaiveDate, (u32, NaiveDateTime)> = BTreeMap::new();
    for slot in slots {
        by_date
            .entry(slot.date())
            .and_modify(|(openings, earliest)| {
                *openings = openings.saturating_add(slot.openings);
                if slot.timestamp < *earliest {
                    *earliest = slot.timestamp;
                }
            })
            .or_insert((slot.openings, slot.timestamp));
    }

    by_date
        .into_iter()
        .map(|(date, (openings, earliest))| {
            format!(
                "{}: {} opening(s) starting at {}",
                date.format(DATE_FORMAT),
                openings,
                earliest.format(TIME_FORMAT)
            )
        })
        .collect()
}

/// Pack the date lines into messages of at most `max_chars` characters.
///
/// A line longer than the budget on its own becomes a message by itself.
pub fn grouped_messages(slots: &[Slot], max_chars: usize) -> Vec<String> {
    let mut messages = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0;

    for line in date_lines(slots) {
        let line_chars = line.chars().count();
        if !buffer.is_empty() && buffer_chars + 1 + line_chars > max_chars {
            messages.push(std::mem::take(&mut buffer));
            buffer_chars = 0;
        }
        if !buffer.is_empty() {
            buffer.push('\n');
            buffer_chars += 1;
        }
        buffer.push_str(&line);
        buffer_chars += line_chars;
    }

    if !buffer.is_empty() {
        messages.push(buffer);
    }
    messages
}

/// Outcome of sending messages to a recipient list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Successful sends
    pub sent: usize,
    /// Sends that failed and were skipped
    pub failed: usize,
}

impl DeliveryReport {
    /// Add another report's counts to this one
    pub fn merge(&mut self, other: DeliveryReport) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

/// Sends messages to many phones, pausing periodically
pub struct SmsDispatcher {
    sender: Arc<dyn SmsSender>,
    throttle_every: usize,
    throttle_pause: Duration,
}

impl SmsDispatcher {
    /// Dispatcher using the throttle settings from `config`
    pub fn new(sender: Arc<dyn SmsSender>, config: &NotifierConfig) -> Self {
        Self {
            sender,
            throttle_every: config.sms_throttle_every,
            throttle_pause: config.sms_throttle_pause,
        }
    }

    /// Send every message to every phone.
    ///
    /// A failed send is logged and skipped. After every `throttle_every`
    /// successful sends the dispatcher pauses before continuing.
    pub async fn send_all(
        &self,
        messages: &[String],
        phones: &[&str],
        trace: &TraceId,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for message in messages {
            for phone in phones {
                match self.sender.send_sms(phone, message).await {
                    Ok(()) => {
                        report.sent += 1;
                        if self.throttle_every > 0 && report.sent % self.throttle_every == 0 {
                            debug!(trace_id = %trace, "Pausing after {} SMS sends", report.sent);
                            sleep(self.throttle_pause).await;
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(trace_id = %trace, "Failed to send SMS to {}: {}", phone, e);
                    }
                }
            }
        }

        info!(
            trace_id = %trace,
            "SMS delivery complete: {} sent, {} failed",
            report.sent,
            report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use appointment_cache::testing::{dense_week, slot_at};

    use super::*;
    use crate::testing::RecordingSmsSender;

    fn config() -> NotifierConfig {
        NotifierConfig {
            sms_throttle_pause: Duration::ZERO,
            ..NotifierConfig::default()
        }
    }

    #[test]
    fn test_short_strategy_lists_each_slot() {
        let slots = vec![
            slot_at(5020, "2024-07-10T08:00:00", 1),
            slot_at(5020, "2024-07-10T13:30:00", 2),
        ];
        let (strategy, messages) = compose_sms(&slots, "Blaine", &config());

        assert_eq!(strategy, SmsStrategy::Short);
        assert_eq!(
            messages,
            vec!["Appointment found:\nWed 7/10/24 8:00 AM\nWed 7/10/24 1:30 PM\nBlaine".to_string()]
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let slots: Vec<Slot> = (0..5)
            .map(|i| slot_at(5020, &format!("2024-07-10T0{}:00:00", i + 1), 1))
            .collect();
        assert_eq!(compose_sms(&slots, "", &config()).0, SmsStrategy::Short);

        let more: Vec<Slot> = (0..6)
            .map(|i| slot_at(5020, &format!("2024-07-10T0{}:00:00", i + 1), 1))
            .collect();
        assert_eq!(compose_sms(&more, "", &config()).0, SmsStrategy::Grouped);
    }

    #[test]
    fn test_dense_week_groups_one_line_per_day() {
        let slots = dense_week(5020, NaiveDate::from_ymd_opt(2024, 7, 10).unwrap());
        let lines = date_lines(&slots);

        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "Wed 7/10/24: 120 opening(s) starting at 8:00 AM");
        assert_eq!(lines[6], "Tue 7/16/24: 120 opening(s) starting at 8:00 AM");
    }

    #[test]
    fn test_grouped_messages_respect_budget() {
        let slots = dense_week(5020, NaiveDate::from_ymd_opt(2024, 7, 10).unwrap());
        let messages = grouped_messages(&slots, 160);

        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.chars().count() <= 160));
        let lines: usize = messages.iter().map(|m| m.lines().count()).sum();
        assert_eq!(lines, 7);
    }

    #[test]
    fn test_line_over_budget_is_sent_alone() {
        let slots = vec![
            slot_at(5020, "2024-07-10T08:00:00", 1),
            slot_at(5020, "2024-07-11T08:00:00", 1),
        ];
        let messages = grouped_messages(&slots, 10);

        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Wed 7/10/24"));
    }

    #[test]
    fn test_earliest_time_ignores_input_order() {
        let slots = vec![
            slot_at(5020, "2024-07-10T15:00:00", 2),
            slot_at(5020, "2024-07-10T09:20:00", 1),
        ];
        assert_eq!(
            date_lines(&slots),
            vec!["Wed 7/10/24: 3 opening(s) starting at 9:20 AM".to_string()]
        );
    }

    #[test]
    fn test_openings_sum_saturates() {
        let slots = vec![
            slot_at(5020, "2024-07-10T08:00:00", u32::MAX),
            slot_at(5020, "2024-07-10T08:10:00", 5),
        ];

        assert_eq!(
            date_lines(&slots),
            vec![format!("Wed 7/10/24: {} opening(s) starting at 8:00 AM", u32::MAX)]
        );
    }

    #[tokio::test]
    async fn test_failed_recipient_is_skipped() {
        let sender = Arc::new(RecordingSmsSender::failing_for(&["bad"]));
        let dispatcher = SmsDispatcher::new(sender.clone(), &config());

        let report = dispatcher
            .send_all(
                &["hello".to_string()],
                &["5551230001", "bad", "5551230002"],
                &TraceId::generate(),
            )
            .await;

        assert_eq!(report, DeliveryReport { sent: 2, failed: 1 });
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_after_every_batch_of_sends() {
        let sender = Arc::new(RecordingSmsSender::new());
        let dispatcher = SmsDispatcher::new(
            sender.clone(),
            &NotifierConfig {
                sms_throttle_every: 2,
                sms_throttle_pause: Duration::from_secs(5),
                ..NotifierConfig::default()
            },
        );
        let phones = ["1", "2", "3", "4", "5"];

        let start = tokio::time::Instant::now();
        let report = dispatcher
            .send_all(&["hi".to_string()], &phones, &TraceId::generate())
            .await;

        assert_eq!(report.sent, 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(15));
    }
}
