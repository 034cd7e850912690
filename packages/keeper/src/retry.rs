//! Retry and error classification
//!
//! String-classifies provider and RPC failures into transient (retry with
//! backoff) and permanent (re-throw). Simulation reverts are transient: the
//! route may have moved and a later quote can succeed where this one
//! reverted.

#![allow(dead_code)]

use eyre::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub base_delay: Duration,
    /// Maximum backoff duration
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-indexed): base * 2^(attempt-1),
    /// capped at max_delay.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(32);
        let delay = self.base_delay.saturating_mul(factor as u32);
        delay.min(self.max_delay)
    }
}

/// Whether an error message describes a transient condition worth retrying.
///
/// Simulation failures are checked before the permanent markers: a failed
/// preflight often embeds the node's revert text, but the route may have
/// moved and a re-quote can succeed.
pub fn is_transient(error: &str) -> bool {
    let e = error.to_lowercase();

    if e.contains("simulation failed") || e.contains("quote simulation") {
        return true;
    }

    // Permanent conditions
    if e.contains("execution reverted")
        || e.contains("insufficient balance")
        || e.contains("insufficient funds")
        || e.contains("user rejected")
        || e.contains("invalid signature")
        || e.contains("out of gas")
        || e.contains("nonce too low")
    {
        return false;
    }

    // Transient network / rate-limit / server-side conditions
    e.contains("timeout")
        || e.contains("timed out")
        || e.contains("econnreset")
        || e.contains("econnrefused")
        || e.contains("socket hang up")
        || e.contains("connection")
        || e.contains("network")
        || e.contains("429")
        || e.contains("too many requests")
        || e.contains("rate limit")
        || e.contains("502")
        || e.contains("503")
        || e.contains("504")
        || e.contains("temporarily unavailable")
}

/// Run `operation` with exponential backoff. Retries while the classifier
/// reports the error transient and attempts remain; otherwise re-throws the
/// last error.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    classifier: fn(&str) -> bool,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let message = e.to_string();
                if attempt >= config.max_attempts || !classifier(&message) {
                    debug!(attempt, error = %message, "Giving up");
                    return Err(e);
                }
                let backoff = config.backoff_for_attempt(attempt);
                warn!(
                    attempt,
                    max = config.max_attempts,
                    ?backoff,
                    error = %message,
                    "Transient error, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transient_cases() {
        for case in [
            "timeout",
            "request timed out after 30s",
            "ECONNRESET",
            "429 Too Many Requests",
            "502",
            "HTTP 503 Service Unavailable",
            "simulation failed: execution reverted",
            "socket hang up",
        ] {
            assert!(is_transient(case), "{} should be transient", case);
        }
    }

    #[test]
    fn test_permanent_cases() {
        for case in [
            "execution reverted",
            "insufficient balance",
            "insufficient funds for gas * price + value",
            "user rejected",
            "nonce too low",
            "something unclassifiable",
        ] {
            assert!(!is_transient(case), "{} should be permanent", case);
        }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(9), Duration::from_secs(8)); // capped
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };

        let result = with_retry(&config, is_transient, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(eyre!("timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<()> = with_retry(&config, is_transient, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(eyre!("execution reverted")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_rethrows_last_error() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };

        let result: Result<()> = with_retry(&config, is_transient, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(eyre!("502")) }
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("502"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
