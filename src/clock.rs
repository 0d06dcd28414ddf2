//! Wall-clock helpers for result timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch as a float, matching the timestamp format
/// carried in result records and `x-object-meta-mtime` headers.
#[must_use]
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_seconds_monotonic_enough() {
        let a = epoch_seconds();
        let b = epoch_seconds();
        assert!(b >= a);
        assert!(a > 1_000_000_000.0);
    }
}
