use std::fmt::Display;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::trace::TraceId;

/// Postgres SQLSTATE codes treated as retryable: statement timeout and
/// connection failures.
const TRANSIENT_SQLSTATES: &[&str] = &["57014", "08000", "08003", "08006"];

/// How an error should be handled by [`with_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely to succeed on retry (timeout, connection reset)
    Transient,
    /// Retrying will not help
    Permanent,
}

/// Bounded retry with a fixed backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,
    /// Pause between attempts (default: 2 seconds)
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Classify a sqlx error as transient or permanent
pub fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::PoolTimedOut => ErrorClass::Transient,
        sqlx::Error::Io(io) => match io.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },
        sqlx::Error::Database(db) => match db.code() {
            Some(code) if TRANSIENT_SQLSTATES.iter().any(|c| *c == code) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },
        _ => ErrorClass::Permanent,
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy's attempts
/// are used up. Returns the last error on failure.
pub async fn with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    trace: &TraceId,
    operation: &str,
    classify: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClass,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && classify(&e) == ErrorClass::Transient => {
                warn!(
                    trace_id = %trace,
                    "{} failed on attempt {}/{}, retrying in {:?}: {}",
                    operation, attempt, max_attempts, policy.backoff, e
                );
                attempt += 1;
                sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
