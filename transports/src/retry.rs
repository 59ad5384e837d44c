use stashpack_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Bounded retry with exponential backoff around transport operations.
///
/// Only transient transport faults are retried; `NotFound` is a valid
/// negative result and fatal errors (auth, local IO, corrupt archives,
/// diverged git history) abort immediately without consuming attempts.
/// The policy bounds attempt count and per-attempt time, not total
/// elapsed time; callers wanting an overall deadline enforce it outside.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Values below 1
    /// are treated as 1.
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Add jitter to prevent thundering herd.
    pub jitter: bool,
    /// Wall-clock bound for a single attempt. `None` leaves attempts
    /// unbounded.
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            per_attempt_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryPolicy {
    /// Configuration for quick probes (fewer retries).
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Configuration for important transfers (more retries).
    pub fn persistent() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Calculates the backoff for a given attempt. Monotonically
    /// non-decreasing and capped at `max_backoff`.
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_duration =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let duration_ms = base_duration.min(self.max_backoff.as_millis() as f64) as u64;
        let mut duration = Duration::from_millis(duration_ms);

        if self.jitter && duration_ms > 0 {
            let jitter_ms = rand::thread_rng().gen_range(0..=(duration_ms / 4));
            duration += Duration::from_millis(jitter_ms);
        }

        duration
    }

    /// Runs `operation` under this policy. After exhausting all attempts
    /// on transient errors, surfaces `TransferExhausted` carrying the
    /// attempt count and the final underlying error.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let outcome = match self.per_attempt_timeout {
                Some(limit) => match timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Transport(format!(
                        "{} timed out after {:?}",
                        operation_name, limit
                    ))),
                },
                None => operation().await,
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        debug!(
                            operation = operation_name,
                            error = %error,
                            "Error is not retryable, failing immediately"
                        );
                        return Err(error);
                    }

                    last_error = Some(error);

                    // Don't sleep after the last attempt
                    if attempt < max_attempts - 1 {
                        let backoff = self.backoff_duration(attempt);
                        warn!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            max_attempts,
                            backoff_ms = backoff.as_millis(),
                            error = %last_error.as_ref().unwrap(),
                            "Operation failed, retrying after backoff"
                        );
                        sleep(backoff).await;
                    }
                }
            }
        }

        let error = last_error.expect("Should have at least one error");
        warn!(
            operation = operation_name,
            max_attempts,
            error = %error,
            "Operation failed after all retry attempts"
        );
        Err(Error::TransferExhausted {
            attempts: max_attempts,
            source: Box::new(error),
        })
    }
}
