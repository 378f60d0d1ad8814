use std::sync::Arc;

use appointment_cache::{Slot, TraceId};
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::error::NotificationError;
use crate::recipients::{Recipient, RecipientDirectory};
use crate::sms::{DeliveryReport, SmsDispatcher, compose_sms};
use crate::transport::{EmailSender, SmsSender};

const EMAIL_SLOT_FORMAT: &str = "%a %-m/%-d/%y %-I:%M %p";

/// Counts from handling one queue message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertReport {
    /// Recipients with at least one confirmed channel
    pub recipients: usize,
    /// SMS sends
    pub sms: DeliveryReport,
    /// Email sends
    pub email: DeliveryReport,
}

/// Sends the alerts for a batch of newly found slots
pub struct AlertProcessor {
    directory: Arc<dyn RecipientDirectory>,
    sms: SmsDispatcher,
    email: Arc<dyn EmailSender>,
    config: NotifierConfig,
}

impl AlertProcessor {
    /// Create a processor over the given directory and transports
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        sms_sender: Arc<dyn SmsSender>,
        email: Arc<dyn EmailSender>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            directory,
            sms: SmsDispatcher::new(sms_sender, &config),
            email,
            config,
        }
    }

    /// Decode a queue message body and send its alerts
    pub async fn process_message(
        &self,
        body: &str,
        trace: &TraceId,
    ) -> Result<AlertReport, NotificationError> {
        let slots: Vec<Slot> = serde_json::from_str(body)?;
        self.process(&slots, trace).await
    }

    /// Notify everyone subscribed to the slots' location.
    ///
    /// Only a recipient lookup failure is returned as an error; individual
    /// send failures are logged and counted.
    pub async fn process(
        &self,
        slots: &[Slot],
        trace: &TraceId,
    ) -> Result<AlertReport, NotificationError> {
        let Some(first) = slots.first() else {
            warn!(trace_id = %trace, "No appointments found in the message body");
            return Ok(AlertReport::default());
        };
        let location_id = first.location_id;
        info!(trace_id = %trace, "{} appointments received for location {}", slots.len(), location_id);

        let recipients: Vec<Recipient> = self
            .directory
            .recipients_for_location(location_id)
            .await?
            .into_iter()
            .filter(Recipient::has_confirmed_channel)
            .collect();

        let mut report = AlertReport {
            recipients: recipients.len(),
            ..AlertReport::default()
        };
        if recipients.is_empty() {
            warn!(
                trace_id = %trace,
                "No users with confirmed contact information for location {}",
                location_id
            );
            return Ok(report);
        }

        let phones: Vec<&str> = recipients.iter().filter_map(Recipient::sms_number).collect();
        if !phones.is_empty() {
            let (strategy, messages) =
                compose_sms(slots, &recipients[0].location_label(), &self.config);
            info!(
                trace_id = %trace,
                "Sending {} {:?} SMS message(s) to {} users for location {}",
                messages.len(),
                strategy,
                phones.len(),
                location_id
            );
            report.sms = self.sms.send_all(&messages, &phones, trace).await;
        }

        for recipient in &recipients {
            let addresses = recipient.email_addresses();
            if addresses.is_empty() {
                continue;
            }

            let (subject, body) = email_message(slots, recipient);
            match self.email.send_email(&addresses, &subject, &body).await {
                Ok(()) => report.email.sent += 1,
                Err(e) => {
                    report.email.failed += 1;
                    warn!(
                        trace_id = %trace,
                        "Failed to email user {}: {}",
                        recipient.user_id,
                        e
                    );
                }
            }
        }

        info!(
            trace_id = %trace,
            "Alerts for location {}: {} SMS sent, {} emails sent, {} failures",
            location_id,
            report.sms.sent,
            report.email.sent,
            report.sms.failed + report.email.failed
        );
        Ok(report)
    }
}

/// Subject and plain-text body listing every slot
pub fn email_message(slots: &[Slot], recipient: &Recipient) -> (String, String) {
    let subject = format!(
        "{} new appointment(s) at {}",
        slots.len(),
        recipient.location_name
    );

    let name = recipient.full_name();
    let mut body = if name.is_empty() {
        String::from("Hello,\n\n")
    } else {
        format!("Hi {},\n\n", name)
    };
    body.push_str(&format!(
        "New appointment openings were found at {}:\n\n",
        recipient.location_label()
    ));
    for slot in slots {
        body.push_str(&format!(
            "{} - {} opening(s)\n",
            slot.timestamp.format(EMAIL_SLOT_FORMAT),
            slot.openings
        ));
    }

    (subject, body)
}
