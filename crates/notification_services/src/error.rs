/// Error type for notification delivery and alert processing.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Simple email service (SES) errors.
    #[error("AWS SES error: {0}")]
    SesError(String),

    /// Simple notification service (SNS) errors.
    #[error("AWS SNS error: {0}")]
    SnsError(String),

    /// Simple queue service (SQS) errors.
    #[error("AWS SQS error: {0}")]
    SqsError(String),

    /// Invalid phone number format.
    #[error("Invalid phone number format: {0}")]
    InvalidPhoneNumber(String),

    /// Invalid email format.
    #[error("Invalid email format")]
    InvalidEmail,

    /// Recipient lookup failed.
    #[error("Recipient directory error: {0}")]
    Directory(#[from] sqlx::Error),

    /// Queue message body was not a JSON array of slots.
    #[error("Invalid notification payload: {0}")]
    Payload(#[from] serde_json::Error),
}
