// src/api/retry.rs
//! Single retry/backoff policy shared by every gateway call.
//!
//! Only admission failures (`RateLimitTimeout`, `EndpointUnavailable`) are
//! re-run; transport failures go straight back to the caller.

use crate::config::RetryConfig;
use crate::error::Result;
use log::debug;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, 0.25 = ±25%
    pub jitter_pct: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_pct: config.jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered backoff before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as i64;
        let jitter = (delay_ms as f64 * self.jitter_pct) as i64;
        if jitter == 0 {
            return delay;
        }
        let jittered_delay = delay_ms + fastrand::i64(-jitter..=jitter);
        Duration::from_millis(std::cmp::max(0, jittered_delay) as u64)
    }

    /// Runs `operation(attempt)` until it succeeds, fails with a non-retryable
    /// error, or attempts run out
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.should_retry() && attempt < self.max_attempts => {
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    debug!(
                        "🔄 Retrying {} ({}/{}) after {:?}: {}",
                        op_name, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, TransportError, TransportErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_pct: 0.25,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy(5);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = policy(3);
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_millis(400));
            assert!(delay >= Duration::from_millis(300) && delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_admission_failures() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .execute("getBalance", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(GatewayError::RateLimitTimeout {
                            waited_ms: 11,
                            max_wait_ms: 10,
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_retries_transport_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(5)
            .execute("sendTransaction", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GatewayError::Transport {
                        endpoint: "helius".to_string(),
                        method: "sendTransaction",
                        source: TransportError::new(TransportErrorKind::Timeout, "timed out"),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(2)
            .execute("getAccountInfo", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::EndpointUnavailable("down".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::EndpointUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
