//! Retry policy with exponential backoff.
//!
//! One policy type serves both the ledger submission step of the anchor
//! cycle and the compare-and-swap loop of the audit chain. Only errors that
//! report themselves as retryable are retried; fatal errors return at once.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Retryable;

/// Bounded retry behaviour: attempt budget plus backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Upper bound of random delay added to each backoff step.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ledger()
    }
}

impl RetryPolicy {
    /// Ledger submission: 3 attempts, 1s then 2s, capped at 30s.
    #[must_use]
    pub fn ledger() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Audit append contention: 3 attempts, 10ms, 20ms, 40ms...
    #[must_use]
    pub fn audit_append() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            factor: 2.0,
            jitter: Duration::from_millis(5),
        }
    }

    /// No sleeping between attempts.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            jitter: Duration::ZERO,
        }
    }

    /// Backoff to wait after the given failed attempt (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        self.initial_delay
            .mul_f64(self.factor.powi(exponent))
            .min(self.max_delay)
    }

    /// Backoff to wait after the given failed attempt, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_micros() as u64);
        base + Duration::from_micros(extra)
    }
}

/// Run `operation` until it succeeds, fails fatally, or the budget runs out.
/// The last error is returned when attempts are exhausted.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!("Operation '{}' succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(val);
            }
            Err(err) if !err.is_retryable() => {
                warn!("Operation '{}' failed with non-retryable error: {}", operation_name, err);
                return Err(err);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    warn!(
                        "Operation '{}' exhausted {} attempts: {}",
                        operation_name, max_attempts, err
                    );
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempt, max_attempts, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}
