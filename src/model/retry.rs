use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RetrySettings;

use super::ModelError;

/// Exponential backoff for transient model failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial: Duration,
    factor: u32,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(initial: Duration, factor: u32, max_attempts: u32) -> Self {
        Self {
            initial,
            factor: factor.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_backoff_ms),
            settings.backoff_factor,
            settings.max_attempts,
        )
    }

    /// Backoff before retry number `attempt` (0-based), with up to 10%
    /// jitter so synchronized callers spread out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial.saturating_mul(self.factor.saturating_pow(attempt));
        base + base.mul_f64(0.1 * rand::random::<f64>())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` up to `max_attempts` times, sleeping between attempts.
    /// Non-transient errors and cancellation end the loop immediately.
    pub async fn run<T, Op, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: Op,
    ) -> Result<T, ModelError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!("transient model failure (attempt {}): {e}; retrying in {delay:?}", attempt + 1);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Counts consecutive failures; opens once the threshold is reached so the
/// stage stops hammering an unavailable dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive += 1;
        self.consecutive
    }

    pub fn is_open(&self) -> bool {
        self.consecutive >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}
