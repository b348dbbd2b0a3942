//! Caller-side retry with exponential backoff.
//!
//! The runtime never retries on its own. Hosts that want retries wrap an
//! operation with [`run_with_retry`] or drive [`RetryPolicy::should_retry`]
//! themselves.
//!
//! # Example
//!
//! ```
//! use sourcekit_core::failure::{RetryDecision, RetryPolicy};
//! use sourcekit_core::SourceError;
//!
//! let policy = RetryPolicy::default();
//! let error = SourceError::decode("desu catalog page", "missing field `data`");
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => println!("retrying in {delay:?} (attempt {attempt})"),
//!     RetryDecision::DoNotRetry { reason } => println!("not retrying: {reason}"),
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::FailureKind;
use crate::error::SourceError;
use crate::transport::TransportError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Backoff multiplier applied on top of the normal delay after `RateLimited`.
const RATE_LIMIT_BACKOFF_FACTOR: u32 = 4;

const MAX_JITTER: Duration = Duration::from_millis(500);

/// Whether and when to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// The attempt number about to run (the first retry is attempt 2).
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Exponential backoff with jitter.
///
/// `delay = min(base * multiplier^(attempt-1), max) + jitter`; after a
/// `RateLimited` failure the delay is multiplied and never shorter than the
/// server's `Retry-After`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Default backoff with a custom attempt count.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed with `error`.
    #[instrument(skip(self, error), fields(kind = ?error.kind(), max_attempts = self.max_attempts))]
    pub fn should_retry(&self, error: &SourceError, attempt: u32) -> RetryDecision {
        let retry_after = match error {
            SourceError::AntibotChallenge { .. } => {
                return RetryDecision::DoNotRetry {
                    reason: "challenge page - needs interactive resolution".to_string(),
                };
            }
            SourceError::Unavailable { .. } => {
                return RetryDecision::DoNotRetry {
                    reason: "content unavailable - retry would not help".to_string(),
                };
            }
            SourceError::Decode { .. } => {
                return RetryDecision::DoNotRetry {
                    reason: "unexpected response structure - retry would not help".to_string(),
                };
            }
            SourceError::Unsupported { .. } => {
                return RetryDecision::DoNotRetry {
                    reason: "operation not supported by source".to_string(),
                };
            }
            SourceError::Transport(TransportError::InvalidUrl { .. } | TransportError::Client { .. }) => {
                return RetryDecision::DoNotRetry {
                    reason: "request could not be built".to_string(),
                };
            }
            SourceError::RateLimited { retry_after, .. } => Some(retry_after.unwrap_or_default()),
            SourceError::Transport(_) => None,
        };

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let mut delay = self.calculate_delay(attempt);
        if let Some(server_delay) = retry_after {
            delay = (delay * RATE_LIMIT_BACKOFF_FACTOR).max(server_delay);
        }

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn jitter() -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Runs `operation` until it succeeds or `policy` gives up, sleeping between attempts.
///
/// # Errors
///
/// Returns the last error when retries are exhausted or the failure is not retryable.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match policy.should_retry(&error, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    if error.kind() == FailureKind::RateLimited {
                        warn!(delay_ms = delay.as_millis(), "rate limited, backing off");
                    }
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "giving up");
                    return Err(error);
                }
            },
        }
    }
}
