use std::collections::HashMap;
use std::sync::Mutex;

use appointment_cache::TraceId;
use async_trait::async_trait;

use crate::error::NotificationError;
use crate::recipients::{Recipient, RecipientDirectory};
use crate::transport::{EmailSender, QueuePublisher, SmsSender};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Queue that keeps every published payload
#[derive(Default)]
pub struct RecordingQueue {
    payloads: Mutex<Vec<(String, String)>>,
    failing: bool,
}

impl RecordingQueue {
    /// Queue accepting every publish
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue rejecting every publish
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Published payloads, in order
    pub fn payloads(&self) -> Vec<String> {
        lock(&self.payloads).iter().map(|(p, _)| p.clone()).collect()
    }

    /// Trace ids attached to the published payloads
    pub fn trace_ids(&self) -> Vec<String> {
        lock(&self.payloads).iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl QueuePublisher for RecordingQueue {
    async fn publish(&self, payload: &str, trace: &TraceId) -> Result<(), NotificationError> {
        if self.failing {
            return Err(NotificationError::SqsError("queue does not exist".to_string()));
        }
        lock(&self.payloads).push((payload.to_string(), trace.to_string()));
        Ok(())
    }
}

/// SMS sender that records messages and fails for chosen numbers
#[derive(Default)]
pub struct RecordingSmsSender {
    sent: Mutex<Vec<(String, String)>>,
    failing: Vec<String>,
}

impl RecordingSmsSender {
    /// Sender accepting every number
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender rejecting the listed numbers as invalid
    pub fn failing_for(phones: &[&str]) -> Self {
        Self {
            failing: phones.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    /// `(phone, message)` pairs sent so far
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl SmsSender for RecordingSmsSender {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        if self.failing.iter().any(|p| p == phone) {
            return Err(NotificationError::InvalidPhoneNumber(phone.to_string()));
        }
        lock(&self.sent).push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

/// Email sender that records every message
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<(Vec<String>, String, String)>>,
}

impl RecordingEmailSender {
    /// Sender accepting every address
    pub fn new() -> Self {
        Self::default()
    }

    /// `(to, subject, body)` triples sent so far
    pub fn sent(&self) -> Vec<(Vec<String>, String, String)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_email(
        &self,
        to: &[&str],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        if to.iter().any(|a| !a.contains('@')) {
            return Err(NotificationError::InvalidEmail);
        }
        lock(&self.sent).push((
            to.iter().map(|a| a.to_string()).collect(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

/// Directory holding a fixed recipient list per location
#[derive(Default)]
pub struct StaticDirectory {
    recipients: HashMap<i32, Vec<Recipient>>,
}

impl StaticDirectory {
    /// Directory with `recipients` grouped by their location
    pub fn new(recipients: Vec<Recipient>) -> Self {
        let mut by_location: HashMap<i32, Vec<Recipient>> = HashMap::new();
        for recipient in recipients {
            by_location
                .entry(recipient.location_id)
                .or_default()
                .push(recipient);
        }
        Self {
            recipients: by_location,
        }
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn recipients_for_location(
        &self,
        location_id: i32,
    ) -> Result<Vec<Recipient>, NotificationError> {
        Ok(self.recipients.get(&location_id).cloned().unwrap_or_default())
    }
}

/// Recipient at `location_id` with every channel confirmed and opted in
pub fn subscriber(user_id: i32, location_id: i32, phone: &str, email: &str) -> Recipient {
    Recipient {
        user_id,
        email: email.to_string(),
        phone: Some(phone.to_string()),
        first_name: Some(format!("User{}", user_id)),
        notify_by_email: true,
        notify_by_sms: true,
        email_confirmed: true,
        phone_confirmed: true,
        location_id,
        location_name: "Blaine".to_string(),
        ..Recipient::default()
    }
}
