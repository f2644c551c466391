/// Bounded linear-backoff retry for storage writes.
///
/// A failed chunk write is retried at most `max_retries` times, sleeping
/// `base_delay * n` before the n-th retry. Only transient failures are
/// retried: the `Transient` variant that adapters raise for 400, 5xx and
/// connection failures, plus a short list of messages from adapters that only
/// report text. Anything else aborts at once.
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, VaultError};

/// Message fragments that mark an untyped storage error as transient.
const TRANSIENT_SIGNATURES: [&str; 4] = [
    "bad request",
    "timed out",
    "timeout",
    "connection reset",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// HTTP statuses worth retrying. The storage network reports overload as 400.
pub fn is_transient_status(status: u16) -> bool {
    status == 400 || (500..600).contains(&status)
}

/// Whether an error message carries one of the transient signatures.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

fn is_retryable(err: &VaultError) -> bool {
    use std::io::ErrorKind;

    match err.root() {
        VaultError::Transient(_) => true,
        VaultError::Storage(msg) => is_transient_message(msg),
        VaultError::Io(e) => matches!(
            e.kind(),
            ErrorKind::TimedOut
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::Interrupted
        ),
        _ => false,
    }
}

/// Run `op` until it succeeds, fails non-transiently, or the budget runs out.
///
/// `op` receives the 1-based attempt number. When transient failures exhaust
/// the budget the result is `UploadExhausted` naming `label`.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) if attempt > policy.max_retries => {
                return Err(VaultError::UploadExhausted {
                    chunk: label.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    chunk = label,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient storage failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
