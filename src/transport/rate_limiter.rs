//! Request pacing between consecutive document fetches.
//!
//! Pacing is keyed: fetches against the same key (a workspace namespace, or a
//! host) are spaced by at least the configured delay, while different keys do
//! not wait on each other. A server-mandated Retry-After pushes the next
//! permitted request for that key further out.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use exporter_core::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//!
//! // First fetch in a workspace proceeds immediately
//! limiter.acquire("alice/notes").await;
//!
//! // Second fetch in the same workspace waits out the remainder of the delay
//! limiter.acquire("alice/notes").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per key (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Keyed request pacer shared across tasks via `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    default_delay: Duration,
    disabled: bool,
    // Arc so the DashMap shard lock is released before awaiting the inner Mutex.
    keys: DashMap<String, Arc<PaceState>>,
}

#[derive(Debug, Default)]
struct PaceWindow {
    /// `None` until the first request for this key.
    last_request: Option<Instant>,
    /// Earliest instant a server allowed us back after a 429.
    not_before: Option<Instant>,
}

#[derive(Debug, Default)]
struct PaceState {
    window: Mutex<PaceWindow>,
    cumulative_delay_ms: AtomicU64,
}

impl PaceState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a pacer with the given minimum spacing per key.
    ///
    /// A zero delay yields a disabled pacer.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = default_delay.as_millis()))]
    pub fn new(default_delay: Duration) -> Self {
        if default_delay.is_zero() {
            return Self::disabled();
        }
        debug!("creating request pacer");
        Self {
            default_delay,
            disabled: false,
            keys: DashMap::new(),
        }
    }

    /// Creates a pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            default_delay: Duration::ZERO,
            disabled: true,
            keys: DashMap::new(),
        }
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured spacing.
    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    fn state_for(&self, key: &str) -> Arc<PaceState> {
        self.keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(PaceState::default()))
            .clone()
    }

    /// Waits until a request for `key` is permitted, then records it.
    ///
    /// The first request for a key proceeds immediately unless a Retry-After
    /// was recorded for it.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) {
        let state = self.state_for(key);
        let mut window = state.window.lock().await;
        let now = Instant::now();

        let spacing_until = if self.disabled {
            None
        } else {
            window.last_request.map(|last| last + self.default_delay)
        };
        let wait_until = match (spacing_until, window.not_before) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if let Some(until) = wait_until
            && until > now
        {
            let delay = until - now;
            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                key,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "pacing request"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    key,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive pacing - consider raising doc_delay_ms or narrowing the selection"
                );
            }
            tokio::time::sleep(delay).await;
        }

        window.not_before = None;
        window.last_request = Some(Instant::now());
    }

    /// Records a server-mandated delay for `key` (from a Retry-After header).
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, key: &str, delay: Duration) {
        let state = self.state_for(key);
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        {
            let mut window = state.window.lock().await;
            window.not_before = Some(window.not_before.map_or(until, |current| current.max(until)));
        }
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            key,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                key,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - site may be under heavy load"
            );
        }
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Accepts integer seconds (`120`) or an HTTP-date. Values above one hour are
/// capped; dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use exporter_core::transport::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(seconds, "Retry-After exceeds maximum, capping at 1 hour");
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}
