//! Retry policy for the HTTP connection.
//!
//! Retries live entirely inside the connection: the engine only observes the
//! final outcome and the `attempts` counter. Transient failures (connect
//! errors, timeouts, 5xx, 429 and the storage-specific 498 rate-limit
//! status) are retried with exponential backoff plus jitter; a `Retry-After`
//! header overrides the computed delay.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Default base delay for the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Backoff configuration for one connection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_attempts(crate::options::DEFAULT_RETRIES + 1)
    }
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` total attempts (initial + retries).
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Total attempts allowed, including the initial one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` just failed.
    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the retry following failed attempt number `attempt`
    /// (1-indexed), with jitter applied.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.backoff_multiplier.powi(exp as i32);
        let raw = self.base_delay.mul_f32(factor).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        let delay = raw + Duration::from_millis(jitter_ms);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "computed backoff delay");
        delay
    }
}

/// Whether a status code is worth retrying.
///
/// 408 is a server-side timeout, 429/498 are rate limits, 5xx are transient
/// server failures. Everything else is a legitimate response the engine must
/// surface as-is.
#[must_use]
pub fn classify_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 498) || status >= 500
}

/// Parses a `Retry-After` header value into a delay.
///
/// Accepts delta-seconds or an RFC 7231 HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}
