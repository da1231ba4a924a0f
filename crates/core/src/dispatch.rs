use crate::error::CapabilityError;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Units of work allowed in flight at once; extra calls queue in
    /// submission order.
    pub max_concurrent: usize,
    /// Retries after the first attempt, applied only to retryable failures.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on every subsequent retry.
    pub base_backoff: Duration,
    /// Per-attempt ceiling; exceeding it counts as a retryable failure.
    pub call_timeout: Duration,
    /// Attempts allowed to start per rolling minute. Zero disables the
    /// throttle.
    pub requests_per_minute: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(60),
            requests_per_minute: 60,
        }
    }
}

/// Wraps a single external call with bounded concurrency, a per-attempt
/// timeout, retry with exponential backoff, and a requests-per-minute
/// ceiling. Holds no domain state.
pub struct CallDispatcher {
    config: DispatchConfig,
    slots: Semaphore,
    window: Mutex<VecDeque<Instant>>,
}

impl CallDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            slots: Semaphore::new(config.max_concurrent.max(1)),
            window: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Run `call`, retrying retryable failures until success or until
    /// retries are exhausted. Returns the success or the last failure.
    pub async fn dispatch<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| CapabilityError::Request("dispatcher shut down".to_string()))?;

        let mut attempt = 0usize;
        let mut backoff = self.config.base_backoff;

        loop {
            attempt += 1;
            self.reserve_rate_slot().await;

            let outcome = match timeout(self.config.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(self.config.call_timeout)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempts = attempt, "call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt <= self.config.max_retries => {
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "retryable call failure, backing off"
                    );
                    sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(error) => {
                    warn!(operation, attempts = attempt, error = %error, "call failed");
                    return Err(error);
                }
            }
        }
    }

    /// Block until starting another attempt stays within the rolling-minute
    /// ceiling, then record the attempt.
    async fn reserve_rate_slot(&self) {
        if self.config.requests_per_minute == 0 {
            return;
        }

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|started| now.duration_since(*started) >= RATE_WINDOW)
                {
                    window.pop_front();
                }

                if window.len() < self.config.requests_per_minute {
                    window.push_back(now);
                    None
                } else {
                    window
                        .front()
                        .map(|oldest| RATE_WINDOW - now.duration_since(*oldest))
                }
            };

            match wait {
                None => return,
                Some(delay) => sleep(delay).await,
            }
        }
    }
}
