//! Bounded retry for calls to flaky upstream services.

use std::future::Future;

use tracing::warn;

/// How a bounded retry ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success(T),
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last_error: Option<E> },
    /// A non-transient error stopped the retries.
    Failed(E),
}

/// Run `op` up to `max_attempts` times, retrying only while `is_transient`
/// holds for the error. There is no backoff between attempts.
pub async fn retry_bounded<T, E, F, Fut, P>(
    max_attempts: u32,
    is_transient: P,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(e) if is_transient(&e) => {
                warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                last_error = Some(e);
            }
            Err(e) => return RetryOutcome::Failed(e),
        }
    }

    RetryOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum Flaky {
        Busy,
        Broken,
    }

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn transient(e: &Flaky) -> bool {
        *e == Flaky::Busy
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = retry_bounded(5, transient, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 5 {
                    Err(Flaky::Busy)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert!(matches!(outcome, RetryOutcome::Success(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), Flaky> = retry_bounded(5, transient, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky::Busy) }
        })
        .await;

        match outcome {
            RetryOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 5);
                assert_eq!(last_error, Some(Flaky::Busy));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), Flaky> = retry_bounded(5, transient, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky::Broken) }
        })
        .await;

        assert!(matches!(outcome, RetryOutcome::Failed(Flaky::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts() {
        let outcome: RetryOutcome<(), Flaky> =
            tokio_test::block_on(retry_bounded(0, transient, |_| async { Ok(()) }));
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 0, last_error: None }));
    }
}
