//! Fixed-interval polling with an optional upper bound.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Interval and limit for [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between two checks.
    pub interval: Duration,
    /// Give up once this much time has passed; `None` never gives up.
    pub timeout: Option<Duration>,
}

/// How a poll ended when no check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// A check produced a value.
    Ready(T),
    /// The timeout elapsed first.
    TimedOut {
        /// Time spent polling.
        elapsed: Duration,
        /// Number of checks performed.
        attempts: u32,
    },
}

/// Run `check` until it yields a value, fails, or the timeout elapses.
///
/// The first check runs immediately; later checks run `interval` apart. The
/// last sleep is shortened so the final check happens at the deadline.
/// Errors from `check` are returned as-is without further polling.
pub async fn poll_until<T, E, F, Fut>(config: &PollConfig, mut check: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            tracing::trace!(
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Poll condition met"
            );
            return Ok(PollOutcome::Ready(value));
        }

        let mut sleep_for = config.interval;
        if let Some(timeout) = config.timeout {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                tracing::debug!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Poll timed out"
                );
                return Ok(PollOutcome::TimedOut { elapsed, attempts });
            }
            sleep_for = sleep_for.min(timeout - elapsed);
        }
        tracing::trace!(attempt = attempts, "Poll condition not met, sleeping");
        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn config(interval: u64, timeout: Option<u64>) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(interval),
            timeout: timeout.map(Duration::from_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_check() {
        let calls = Cell::new(0);
        let outcome: Result<_, ()> = poll_until(&config(2, Some(10)), || {
            calls.set(calls.get() + 1);
            async { Ok(Some(7)) }
        })
        .await;
        assert_eq!(outcome, Ok(PollOutcome::Ready(7)));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_interval() {
        let start = Instant::now();
        let calls = Cell::new(0);
        let outcome: Result<_, ()> = poll_until(&config(2, None), || {
            calls.set(calls.get() + 1);
            let done = calls.get() == 3;
            async move { Ok(done.then_some("done")) }
        })
        .await;
        assert_eq!(outcome, Ok(PollOutcome::Ready("done")));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let outcome: Result<PollOutcome<()>, ()> =
            poll_until(&config(2, Some(5)), || async { Ok(None) }).await;
        match outcome {
            Ok(PollOutcome::TimedOut { elapsed, attempts }) => {
                assert_eq!(elapsed, Duration::from_secs(5));
                // checks at 0s, 2s, 4s and the deadline
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_stops_polling() {
        let calls = Cell::new(0);
        let outcome: Result<PollOutcome<()>, &str> = poll_until(&config(1, None), || {
            calls.set(calls.get() + 1);
            let fail = calls.get() == 2;
            async move {
                if fail {
                    Err("broken")
                } else {
                    Ok(None)
                }
            }
        })
        .await;
        assert_eq!(outcome, Err("broken"));
        assert_eq!(calls.get(), 2);
    }
}
