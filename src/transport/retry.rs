//! Retry logic with exponential backoff for transient request failures.
//!
//! A failed call is classified into a [`FailureType`]; the [`RetryPolicy`] then
//! decides whether and when to try again. The same policy drives document
//! fetches, workspace listing, and image downloads.
//!
//! # Example
//!
//! ```
//! use exporter_core::ExportError;
//! use exporter_core::transport::{RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = ExportError::request_failed("https://www.yuque.com/api/user", 503, "", None);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument};

use super::rate_limiter::parse_retry_after;
use crate::error::ExportError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Multiplier used when reloading a workspace's document list.
pub const DOC_LIST_BACKOFF_MULTIPLIER: f32 = 1.5;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry (timeouts, 5xx, connection errors).
    Transient,

    /// Failure that won't succeed regardless of retries (404, bad input, local IO).
    Permanent,

    /// The session is missing, expired, or lacks permission.
    NeedsAuth,

    /// Server rate limiting (HTTP 429). Honors Retry-After when present.
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt this will be (1-indexed, so the first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately 1s then 2s before attempts run out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    ///
    /// `max_attempts` includes the initial attempt and is clamped to at least 1.
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
            max_jitter: MAX_JITTER,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that retries without waiting. Useful for tests and local mirrors.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_jitter: Duration::ZERO,
        }
    }

    /// Same policy with a different multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, backoff_multiplier: f32) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required - retry without a new session would not help"
                        .to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

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
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Classifies an error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Transport | Transient |
/// | `RequestFailed` 408, 5xx | Transient |
/// | `RequestFailed` 429 | `RateLimited` |
/// | `RequestFailed` 401, 403 | `NeedsAuth` |
/// | `CredentialsExpired`, `LoginRejected` | `NeedsAuth` |
/// | everything else | Permanent |
#[must_use]
pub fn classify_error(error: &ExportError) -> FailureType {
    match error {
        ExportError::RequestFailed { status, .. } => classify_http_status(*status),
        ExportError::Timeout { .. } => FailureType::Transient,
        ExportError::Transport { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        ExportError::CredentialsExpired | ExportError::LoginRejected { .. } => {
            FailureType::NeedsAuth
        }
        ExportError::InvalidResponse { .. }
        | ExportError::ExtractionFailed { .. }
        | ExportError::EmptyContent { .. }
        | ExportError::InvalidNamespace { .. }
        | ExportError::Cipher { .. }
        | ExportError::Filesystem { .. }
        | ExportError::Encode { .. }
        | ExportError::ClientBuild(_)
        | ExportError::Cancelled => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

/// Server-mandated delay from a 429 response, if any.
#[must_use]
pub fn retry_after_delay(error: &ExportError) -> Option<Duration> {
    match error {
        ExportError::RequestFailed {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

/// Runs `operation` until it succeeds or `policy` gives up.
///
/// Rate-limited failures wait for the server's Retry-After when provided,
/// otherwise the backoff delay. Returns the last error once retries are
/// exhausted or the failure is not retryable.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, ExportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExportError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let failure_type = classify_error(&error);
                let server_delay = if failure_type == FailureType::RateLimited {
                    retry_after_delay(&error)
                } else {
                    None
                };

                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        let delay = server_delay.unwrap_or(backoff_delay);
                        info!(
                            target_label = label,
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            using_retry_after = server_delay.is_some(),
                            error = %error,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(target_label = label, %reason, attempt, "not retrying");
                        return Err(error);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn status_error(status: u16) -> ExportError {
        ExportError::request_failed("https://www.yuque.com/x", status, "", None)
    }

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
    }

    #[test]
    fn test_delay_calculation_first_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        let delay = policy.calculate_delay(1);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1500));
    }

    #[test]
    fn test_delay_calculation_third_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        let delay = policy.calculate_delay(3);
        assert!(delay >= Duration::from_secs(4));
        assert!(delay <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_calculation_respects_max_delay() {
        let policy = RetryPolicy::new(20, Duration::from_secs(1), Duration::from_secs(10), 2.0);
        let delay = policy.calculate_delay(10);
        assert!(delay >= Duration::from_secs(10));
        assert!(delay <= Duration::from_millis(10_500));
    }

    #[test]
    fn test_doc_list_multiplier() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0)
            .with_multiplier(DOC_LIST_BACKOFF_MULTIPLIER);
        let delay = policy.calculate_delay(2);
        assert!(delay >= Duration::from_millis(1500));
        assert!(delay <= Duration::from_millis(2000));
    }

    #[test]
    fn test_immediate_policy_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.calculate_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_classify_statuses() {
        assert_eq!(classify_error(&status_error(401)), FailureType::NeedsAuth);
        assert_eq!(classify_error(&status_error(403)), FailureType::NeedsAuth);
        assert_eq!(classify_error(&status_error(404)), FailureType::Permanent);
        assert_eq!(classify_error(&status_error(408)), FailureType::Transient);
        assert_eq!(classify_error(&status_error(429)), FailureType::RateLimited);
        assert_eq!(classify_error(&status_error(500)), FailureType::Transient);
        assert_eq!(classify_error(&status_error(503)), FailureType::Transient);
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&ExportError::timeout("https://x")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&ExportError::CredentialsExpired),
            FailureType::NeedsAuth
        );
        assert_eq!(
            classify_error(&ExportError::empty_content("a/b", "c")),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::immediate(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_permanent_and_auth_do_not_retry() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::NeedsAuth, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_retry_after_delay_parsed_from_error() {
        let error =
            ExportError::request_failed("https://x", 429, "", Some("7".to_string()));
        assert_eq!(retry_after_delay(&error), Some(Duration::from_secs(7)));
        assert_eq!(retry_after_delay(&status_error(429)), None);
    }

    #[tokio::test]
    async fn test_retry_with_policy_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_policy(&RetryPolicy::immediate(3), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(status_error(502))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_policy_stops_on_permanent_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_with_policy(&RetryPolicy::immediate(5), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(status_error(404)) }
        })
        .await;

        assert!(matches!(
            result,
            Err(ExportError::RequestFailed { status: 404, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
