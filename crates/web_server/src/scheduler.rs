use std::sync::Arc;
use std::time::Duration;

use appointment_cache::TraceId;
use appointment_cache::store::Clock;
use chrono::Timelike;
use notification_services::{AlertProcessor, AlertReport, NotificationError, QueueMessage, SqsQueue};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use crate::poll_cycle::AppointmentPoller;

/// Long-poll wait for each queue receive
const RECEIVE_WAIT_SECONDS: i32 = 20;

/// Pause after a failed receive before polling again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Whether `hour` falls within `active_hours`, both ends inclusive
pub fn in_active_hours(hour: u32, active_hours: (u32, u32)) -> bool {
    let (start, end) = active_hours;
    (start..=end).contains(&hour)
}

/// Run a poll cycle every `period` while inside the active hours
pub async fn run_timer(
    poller: Arc<AppointmentPoller>,
    period: Duration,
    active_hours: (u32, u32),
    ignore_timer: bool,
    clock: Clock,
) {
    if ignore_timer {
        info!("Timer is disabled, cycles only run on request");
        return;
    }

    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Polling every {}s between {}:00 and {}:59", period.as_secs(), active_hours.0, active_hours.1);

    loop {
        ticks.tick().await;

        let hour = clock().hour();
        if !in_active_hours(hour, active_hours) {
            debug!("Outside active hours ({}), skipping cycle", hour);
            continue;
        }

        let trace = TraceId::generate();
        match poller.run_cycle(&trace).await {
            Ok(report) => info!(
                trace_id = %report.trace_id,
                "Timer cycle found {} new appointments, {} locations failed",
                report.new_count(),
                report.failures.len()
            ),
            Err(e) => error!(trace_id = %trace, "Timer cycle failed: {}", e),
        }
    }
}

/// Handle one queue message under its own trace id
pub async fn handle_message(
    processor: &AlertProcessor,
    message: &QueueMessage,
) -> Result<AlertReport, NotificationError> {
    let trace = message
        .trace_id
        .as_deref()
        .map(TraceId::from_existing)
        .unwrap_or_else(TraceId::generate);

    processor.process_message(&message.body, &trace).await.inspect_err(|e| {
        error!(trace_id = %trace, "Failed to process queue message: {}", e);
    })
}

/// Receive alert batches forever; a message is deleted only once handled
pub async fn run_consumer(queue: Arc<SqsQueue>, processor: Arc<AlertProcessor>) {
    info!("Listening for appointment alerts");

    loop {
        let messages = match queue.receive(RECEIVE_WAIT_SECONDS).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Queue receive failed: {}", e);
                sleep(RECEIVE_ERROR_BACKOFF).await;
                continue;
            }
        };

        for message in &messages {
            if handle_message(&processor, message).await.is_err() {
                continue;
            }
            if let Err(e) = queue.delete(&message.receipt_handle).await {
                warn!("Failed to delete handled message: {}", e);
            }
        }
    }
}
