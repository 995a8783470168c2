//! Retry policy: bounded retry with exponential backoff.
//!
//! Adapters hold a [`RetryPolicy`] and run every provider call through
//! [`RetryPolicy::execute`]. Only failures accepted by the policy's
//! predicate are retried; everything else propagates on the first attempt.

use modelgate_config::RetryConfig;
use modelgate_core::error::AdapterError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Decides whether a failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&AdapterError) -> bool + Send + Sync>;

/// Markers of a transient failure, matched against the lowercased error text.
const TRANSIENT_MARKERS: [&str; 4] = ["timeout", "429", "503", "connection"];

/// Default classifier: the failure message mentions a transient marker.
pub fn is_transient(error: &AdapterError) -> bool {
    let message = error.to_string().to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

/// Bounded retry with exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Base delay; the wait before retry `i` (0-based) is `retry_delay * 2^i`.
    pub retry_delay: Duration,
    predicate: RetryPredicate,
    interrupt: Option<watch::Receiver<bool>>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            predicate: Arc::new(is_transient),
            interrupt: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Replace the retryable-failure classifier.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&AdapterError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Abort backoff sleeps once `interrupt` flips to `true`.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn is_retryable(&self, error: &AdapterError) -> bool {
        (self.predicate)(error)
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent.
    ///
    /// A retryable failure that keeps recurring makes exactly
    /// `max_retries + 1` attempts and then yields
    /// [`AdapterError::RetriesExhausted`] wrapping the last cause.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.is_retryable(&error) {
                debug!(error = %error, "Non-retryable failure, giving up");
                return Err(error);
            }

            if attempt >= self.max_retries {
                warn!(
                    attempts = attempt + 1,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(AdapterError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );

            if self.sleep(delay).await {
                warn!(attempts = attempt + 1, "Retry interrupted during backoff");
                return Err(AdapterError::Interrupted {
                    attempts: attempt + 1,
                    source: Box::new(error),
                });
            }

            attempt += 1;
        }
    }

    /// Sleep for `delay`; returns `true` when interrupted first.
    async fn sleep(&self, delay: Duration) -> bool {
        let Some(mut interrupt) = self.interrupt.clone() else {
            tokio::time::sleep(delay).await;
            return false;
        };

        let stopped = *interrupt.borrow_and_update();
        if stopped {
            return true;
        }

        // A dropped sender disables the interrupt branch; the sleep still runs.
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            Ok(_) = interrupt.wait_for(|stop| *stop) => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("interruptible", &self.interrupt.is_some())
            .finish()
    }
}
