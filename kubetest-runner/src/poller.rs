//! Readiness poller
//!
//! Evaluates a predicate at a fixed interval until it yields a value, fails,
//! the cancellation token fires, or the deadline passes. No backoff.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The predicate itself failed
    #[error("{0}")]
    Predicate(E),

    #[error("wait cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Fixed-interval predicate poller
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    interval: Duration,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            deadline: None,
            cancel,
        }
    }

    /// Gives up at `deadline`; `None` waits until cancelled
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls `predicate` until it returns `Ok(Some(value))`
    ///
    /// The first evaluation happens immediately. A predicate error is
    /// returned at once, without further attempts.
    pub async fn wait_until<T, E, F, Fut>(&self, mut predicate: F) -> Result<T, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let started = Instant::now();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = until(self.deadline) => return Err(WaitError::TimedOut(started.elapsed())),
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = until(self.deadline) => return Err(WaitError::TimedOut(started.elapsed())),
                outcome = predicate() => outcome,
            };

            match outcome {
                Ok(Some(value)) => {
                    debug!("Condition met after {} attempt(s)", attempts);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(WaitError::Predicate(e)),
            }
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn poller() -> ReadinessPoller {
        ReadinessPoller::new(Duration::from_millis(5), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_returns_value_when_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let value: Result<usize, WaitError<String>> = poller()
            .wait_until(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n == 3 { Some(n) } else { None })
                }
            })
            .await;

        assert_eq!(value.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_error_returns_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), WaitError<String>> = poller()
            .wait_until(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                }
            })
            .await;

        assert!(matches!(result, Err(WaitError::Predicate(ref e)) if e == "boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_wait() {
        let cancel = CancellationToken::new();
        let poller = ReadinessPoller::new(Duration::from_millis(5), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), WaitError<String>> =
            poller.wait_until(|| async { Ok(None) }).await;
        assert!(matches!(result, Err(WaitError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_stops_wait() {
        let poller = poller().with_deadline(Some(Instant::now() + Duration::from_millis(30)));

        let result: Result<(), WaitError<String>> =
            poller.wait_until(|| async { Ok(None) }).await;
        match result {
            Err(WaitError::TimedOut(elapsed)) => assert!(elapsed >= Duration::from_millis(30)),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }
}
