//! Bounded retries of submissions to the consensus chain.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::{sleep, Instant};

use crate::traits::BridgeError;

/// Decides, per failed attempt, whether an error is worth another try.
type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Exponential backoff capped in delay and in total time spent.
#[derive(Clone)]
pub struct Backoff<E> {
    /// Delay before the first retry.
    initial_delay: Duration,

    /// Upper bound of a single delay.
    max_delay: Duration,

    /// Growth factor applied to the delay after every retry.
    multiplier: f64,

    /// Time after the first attempt past which no retry is started.
    max_elapsed: Duration,

    is_retryable: Classifier<E>,
}

impl<E> std::fmt::Debug for Backoff<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("max_elapsed", &self.max_elapsed)
            .finish_non_exhaustive()
    }
}

impl<E> Backoff<E> {
    /// Retries every error until `max_elapsed` has passed.
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_elapsed,
            is_retryable: Arc::new(|_| true),
        }
    }

    /// Only retries errors for which `is_retryable` holds. Others are returned at once.
    pub fn retry_if<F>(mut self, is_retryable: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(is_retryable);
        self
    }

    /// Delay before retry number `attempt`, counting from zero.
    fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Backoff of submissions to the consensus chain: starts at half a second, grows by half each
/// attempt and gives up after `max_elapsed`. Rejected or unknown messages are not resubmitted.
pub fn submission_backoff(max_elapsed: Duration) -> Backoff<BridgeError> {
    Backoff::new(
        Duration::from_millis(500),
        Duration::from_secs(60),
        1.5,
        max_elapsed,
    )
    .retry_if(BridgeError::is_transient)
}

/// Runs `attempt` until it succeeds or `backoff` gives up, returning the last error.
///
/// The last retry is pulled forward so that it starts at the deadline.
pub async fn retry_with<A, E, Fut, Gen>(backoff: Backoff<E>, mut attempt: Gen) -> Result<A, E>
where
    Fut: Future<Output = Result<A, E>>,
    Gen: FnMut() -> Fut,
{
    let deadline = Instant::now() + backoff.max_elapsed;
    let mut retries = 0;

    loop {
        let err = match attempt().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || !(backoff.is_retryable)(&err) {
            return Err(err);
        }

        sleep(backoff.delay(retries).min(remaining)).await;
        retries = retries.saturating_add(1);
    }
}
