use appointment_cache::TraceId;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ses::Client as SesClient;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use tracing::{debug, error, info};

use crate::error::NotificationError;

/// Message attribute carrying the correlation id of the publishing cycle
pub const TRACE_ID_ATTRIBUTE: &str = "trace-id";

/// Sends batch payloads to the notification queue
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish one batch body
    async fn publish(&self, payload: &str, trace: &TraceId) -> Result<(), NotificationError>;
}

/// Sends a text message to one phone number
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Send `message` to `phone` as entered by the user
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), NotificationError>;
}

/// Sends a plain-text email
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one message addressed to every entry of `to`
    async fn send_email(
        &self,
        to: &[&str],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError>;
}

/// A message taken off the queue
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Batch payload
    pub body: String,
    /// Handle used to delete the message once handled
    pub receipt_handle: String,
    /// Correlation id of the cycle that published it, when present
    pub trace_id: Option<String>,
}

/// SQS queue used both to publish batches and to consume them
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsQueue {
    /// Create a queue handle using the default AWS credential chain
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            client: SqsClient::new(&config),
            queue_url: queue_url.into(),
        }
    }

    /// Long-poll for up to ten messages
    pub async fn receive(&self, wait_seconds: i32) -> Result<Vec<QueueMessage>, NotificationError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(10)
            .wait_time_seconds(wait_seconds)
            .message_attribute_names(TRACE_ID_ATTRIBUTE)
            .send()
            .await
            .map_err(|e| NotificationError::SqsError(DisplayErrorContext(&e).to_string()))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|m| {
                let receipt_handle = m.receipt_handle()?.to_string();
                let trace_id = m
                    .message_attributes()
                    .and_then(|attrs| attrs.get(TRACE_ID_ATTRIBUTE))
                    .and_then(|value| value.string_value())
                    .map(str::to_string);
                Some(QueueMessage {
                    body: m.body().unwrap_or_default().to_string(),
                    receipt_handle,
                    trace_id,
                })
            })
            .collect();

        Ok(messages)
    }

    /// Remove a handled message from the queue
    pub async fn delete(&self, receipt_handle: &str) -> Result<(), NotificationError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| NotificationError::SqsError(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for SqsQueue {
    async fn publish(&self, payload: &str, trace: &TraceId) -> Result<(), NotificationError> {
        let trace_attribute = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(trace.as_str())
            .build()
            .map_err(|e| NotificationError::SqsError(format!("Failed to build attribute: {}", e)))?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(payload)
            .message_attributes(TRACE_ID_ATTRIBUTE, trace_attribute)
            .send()
            .await
            .map_err(|e| NotificationError::SqsError(DisplayErrorContext(&e).to_string()))?;

        debug!(
            trace_id = %trace,
            "Published {} byte batch, message id {}",
            payload.len(),
            output.message_id().unwrap_or_default()
        );
        Ok(())
    }
}

/// Normalise a user-entered phone number to E.164.
///
/// Punctuation is stripped; ten digits are taken as a North American number.
pub fn format_e164(phone: &str) -> Result<String, NotificationError> {
    let trimmed = phone.trim();
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '-' | ' ' | '.' | '+'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(NotificationError::InvalidPhoneNumber(phone.to_string()));
    }

    match digits.len() {
        10 if !trimmed.starts_with('+') => Ok(format!("+1{}", digits)),
        8..=15 => Ok(format!("+{}", digits)),
        _ => Err(NotificationError::InvalidPhoneNumber(phone.to_string())),
    }
}

/// SMS through SNS direct publish
#[derive(Debug, Clone)]
pub struct SnsSmsSender {
    sns_client: SnsClient,
}

impl SnsSmsSender {
    /// Create a sender using the default AWS credential chain
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            sns_client: SnsClient::new(&config),
        }
    }
}

#[async_trait]
impl SmsSender for SnsSmsSender {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        let formatted_phone = format_e164(phone)?;

        self.sns_client
            .publish()
            .phone_number(&formatted_phone)
            .message(message)
            .send()
            .await
            .map_err(|e| NotificationError::SnsError(e.to_string()))?;

        debug!("SMS sent to {}", formatted_phone);
        Ok(())
    }
}

/// Plain-text email through SES
#[derive(Debug, Clone)]
pub struct SesEmailSender {
    ses_client: SesClient,
    from_email: String,
}

impl SesEmailSender {
    /// Create a sender using the default AWS credential chain
    pub async fn from_env(from_email: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            ses_client: SesClient::new(&config),
            from_email: from_email.into(),
        }
    }
}

#[async_trait]
impl EmailSender for SesEmailSender {
    async fn send_email(
        &self,
        to: &[&str],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        if to.is_empty() || to.iter().any(|address| !address.contains('@')) {
            return Err(NotificationError::InvalidEmail);
        }

        let subject_content = aws_sdk_ses::types::Content::builder()
            .data(subject)
            .build()
            .map_err(|e| NotificationError::SesError(format!("Failed to build subject: {}", e)))?;

        let text_content = aws_sdk_ses::types::Content::builder()
            .data(body)
            .build()
            .map_err(|e| NotificationError::SesError(format!("Failed to build text body: {}", e)))?;

        let message = aws_sdk_ses::types::Message::builder()
            .subject(subject_content)
            .body(aws_sdk_ses::types::Body::builder().text(text_content).build())
            .build();

        let destination = aws_sdk_ses::types::Destination::builder()
            .set_to_addresses(Some(to.iter().map(|a| a.to_string()).collect()))
            .build();

        let result = self
            .ses_client
            .send_email()
            .source(&self.from_email)
            .destination(destination)
            .message(message)
            .send()
            .await;

        match result {
            Ok(output) => {
                info!("Email sent to {}, SES message id {}", to.join(", "), output.message_id());
                Ok(())
            }
            Err(e) => {
                error!("AWS SES error: {}", DisplayErrorContext(&e));
                let error_msg = match e.as_service_error() {
                    Some(service_error) => format!("AWS SES service error: {:?}", service_error),
                    None => format!("AWS SES error: {}", e),
                };
                Err(NotificationError::SesError(error_msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("(555) 123-4567", "+15551234567")]
    #[case("555.123.4567", "+15551234567")]
    #[case("1-555-123-4567", "+15551234567")]
    #[case("+44 20 7946 0958", "+442079460958")]
    #[case("+1 555 123 4567", "+15551234567")]
    fn test_format_e164(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(format_e164(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("call me")]
    #[case("12345")]
    #[case("+1234567890123456")]
    fn test_invalid_phone_numbers(#[case] input: &str) {
        assert!(matches!(
            format_e164(input),
            Err(NotificationError::InvalidPhoneNumber(_))
        ));
    }
}
