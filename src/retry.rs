//! Repetition of fallible operations with fixed or growing pauses between attempts.
//!
//! ```
//! use ardflow::retry::{retry, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::ZERO, 1.0);
//! let mut calls = 0;
//! let result: Result<u32, String> = retry(&policy, |_| true, || {
//!     calls += 1;
//!     if calls < 2 { Err("busy".to_string()) } else { Ok(calls) }
//! });
//! assert_eq!(result, Ok(2));
//! ```

use std::time::Duration;

/// How often and how patiently a failing operation is repeated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub tries: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl RetryPolicy {
    pub const fn new(tries: u32, delay: Duration, backoff: f64) -> Self {
        Self { tries, delay, backoff }
    }

    /// Scihub downloads
    pub const DOWNLOAD_SCIHUB: RetryPolicy = RetryPolicy::new(7, Duration::from_secs(5), 1.0);
    /// ASF downloads
    pub const DOWNLOAD_ASF: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(5), 1.0);
    /// Single toolbox steps
    pub const GPT: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1), 1.0);
    /// One GRD acquisition group
    pub const GRD_BATCH: RetryPolicy = RetryPolicy::new(4, Duration::from_secs(5), 1.0);
    /// Catalogue searches
    pub const SEARCH: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(5), 2.0);

    /// Pause after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff.powi(attempt.saturating_sub(1) as i32);
        self.delay.mul_f64(factor.max(0.0))
    }
}

/// Run `op` until it succeeds, the policy is exhausted, or it fails with an
/// error `should_retry` rejects
pub fn retry<T, E, F, R>(policy: &RetryPolicy, should_retry: R, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
{
    let tries = policy.tries.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < tries && should_retry(&e) => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "Attempt {} of {} failed: {}. Retrying in {:.1}s",
                    attempt,
                    tries,
                    e,
                    delay.as_secs_f64()
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    log::warn!("Giving up after {} attempts: {}", attempt, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArdError;
    use std::cell::Cell;

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(1), 1.0);

    #[test]
    fn test_succeeds_after_failures() {
        let calls = Cell::new(0);
        let result: Result<u32, ArdError> = retry(&FAST, ArdError::is_download, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ArdError::Download("flaky".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_returns_last_error_when_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), ArdError> = retry(&FAST, |_| true, || {
            calls.set(calls.get() + 1);
            Err(ArdError::Download(format!("failure {}", calls.get())))
        });
        assert_eq!(calls.get(), 3);
        assert!(result.unwrap_err().to_string().contains("failure 3"));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), ArdError> = retry(&FAST, ArdError::is_download, || {
            calls.set(calls.get() + 1);
            Err(ArdError::InvalidParameters("bad".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_backoff() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2), 2.0);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(RetryPolicy::GPT.delay_after(3), Duration::from_secs(1));
    }
}
