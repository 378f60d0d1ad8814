//! # Notification Services
//!
//! Turns newly detected appointment slots into notifications. Slots are
//! chunked into queue batches by the poller; the alert processor consumes a
//! batch, looks up the recipients of its location and sends SMS and email.

/// Queue consumer side: recipients lookup and SMS/email fan-out
pub mod alerts;
/// Byte-budgeted chunking of slots into queue messages
pub mod batcher;
/// Budgets and thresholds for batching and SMS
pub mod config;
/// Error type shared by transports and the alert processor
pub mod error;
/// Users subscribed to a location
pub mod recipients;
/// SMS composition strategies and throttled dispatch
pub mod sms;
/// Queue, SMS and email transports
pub mod transport;

/// In-memory transports and directory used by tests
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use alerts::{AlertProcessor, AlertReport};
pub use batcher::{NotificationBatch, chunk_for_queue};
pub use config::NotifierConfig;
pub use error::NotificationError;
pub use recipients::{PgRecipientDirectory, Recipient, RecipientDirectory};
pub use sms::{DeliveryReport, SmsDispatcher, SmsStrategy, compose_sms};
pub use transport::{
    EmailSender, QueueMessage, QueuePublisher, SesEmailSender, SmsSender, SnsSmsSender, SqsQueue,
    format_e164,
};
