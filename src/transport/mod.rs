//! Talking to the workspace host.
//!
//! - [`ApiClient`] - session-aware JSON/HTML/binary requests
//! - [`RetryPolicy`] - exponential backoff for transient failures
//! - [`RateLimiter`] - pacing between consecutive document fetches

mod client;
mod rate_limiter;
mod retry;

pub use client::ApiClient;
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, DOC_LIST_BACKOFF_MULTIPLIER, FailureType, RetryDecision, RetryPolicy,
    classify_error, retry_after_delay, retry_with_policy,
};
