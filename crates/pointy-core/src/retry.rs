//! Bounded wait-then-retry loop.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Poll at a fixed `interval` until an attempt succeeds or `deadline` has elapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Ready(T),
    Retry,
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The deadline passed without a successful attempt.
    Exhausted { attempts: u32, elapsed: Duration },
    /// An attempt failed outright; failures are never retried.
    Failed(E),
}

impl RetryPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, E>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            if let Attempt::Ready(value) = attempt().await.map_err(RetryError::Failed)? {
                return Ok(value);
            }
            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                return Err(RetryError::Exhausted { attempts, elapsed });
            }
            tokio::time::sleep(self.interval.min(self.deadline - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn returns_first_ready_value() {
        let policy = RetryPolicy::new(Duration::from_millis(5), Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<()>> = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n == 3 { Attempt::Ready(n) } else { Attempt::Retry })
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_deadline() {
        let policy = RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(100));
        let started = Instant::now();

        let result: Result<(), RetryError<()>> =
            policy.run(|| async { Ok(Attempt::Retry) }).await;

        match result {
            Err(RetryError::Exhausted { attempts, elapsed }) => {
                assert!(attempts > 1);
                assert!(elapsed >= Duration::from_millis(100));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_retried() {
        let policy = RetryPolicy::new(Duration::from_millis(5), Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<&str>> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom")
            })
            .await;

        assert!(matches!(result, Err(RetryError::Failed("boom"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
