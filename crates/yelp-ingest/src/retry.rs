//! Bounded retry of database work.
//!
//! [`RetryPolicy::execute`] is the one retry loop in the crate. Callers supply
//! the work as an [`Attempt`] and a classifier that decides whether a failure
//! is worth repeating.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Lock conflicts that go away when the work is replayed.
    Transient,
    /// Other server or connection failures; replayed with the same budget.
    Persistent,
    /// Programming or data errors that will fail identically on replay.
    Fatal,
}

/// A repeatable unit of work. Each call must be independent of earlier
/// failed calls, e.g. because the previous transaction was rolled back.
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn attempt(&mut self) -> Result<Self::Output, Self::Error>;

    /// Name used in retry warnings.
    fn target(&self) -> &str;
}

/// Why the executor gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; `class` describes the last failure.
    Exhausted {
        attempts: u32,
        class: FailureClass,
        source: E,
    },
    /// A fatal failure stopped the loop early.
    Fatal { attempts: u32, source: E },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts. Zero replays immediately.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
    pub async fn execute<A, C>(&self, op: &mut A, classify: C) -> Result<A::Output, RetryError<A::Error>>
    where
        A: Attempt,
        C: Fn(&A::Error) -> FailureClass + Send,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op.attempt().await {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            let class = classify(&err);
            if class == FailureClass::Fatal {
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    source: err,
                });
            }
            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    class,
                    source: err,
                });
            }

            match class {
                FailureClass::Transient => warn!(
                    operation = op.target(),
                    error = %err,
                    "Deadlock detected, retrying {}/{}",
                    attempt + 1,
                    max_attempts
                ),
                _ => warn!(
                    operation = op.target(),
                    error = %err,
                    "Database error, retrying {}/{}",
                    attempt + 1,
                    max_attempts
                ),
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, thiserror::Error)]
    #[error("{0:?}")]
    struct Failure(FailureClass);

    /// Replays scripted failures, then succeeds with the attempt count.
    struct Scripted {
        failures: VecDeque<FailureClass>,
        calls: u32,
    }

    impl Scripted {
        fn new(failures: &[FailureClass]) -> Self {
            Self {
                failures: failures.iter().copied().collect(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl Attempt for Scripted {
        type Output = u32;
        type Error = Failure;

        async fn attempt(&mut self) -> Result<u32, Failure> {
            self.calls += 1;
            match self.failures.pop_front() {
                Some(class) => Err(Failure(class)),
                None => Ok(self.calls),
            }
        }

        fn target(&self) -> &str {
            "scripted"
        }
    }

    fn by_payload(err: &Failure) -> FailureClass {
        err.0
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let mut op = Scripted::new(&[FailureClass::Transient, FailureClass::Persistent]);
        let result = RetryPolicy::default().execute(&mut op, by_payload).await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_class() {
        let mut op = Scripted::new(&[FailureClass::Persistent, FailureClass::Transient, FailureClass::Transient]);
        let err = RetryPolicy::new(3).execute(&mut op, by_payload).await.unwrap_err();

        match err {
            RetryError::Exhausted { attempts, class, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(class, FailureClass::Transient);
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(op.calls, 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let mut op = Scripted::new(&[FailureClass::Fatal]);
        let err = RetryPolicy::new(5).execute(&mut op, by_payload).await.unwrap_err();
        assert!(matches!(err, RetryError::Fatal { attempts: 1, .. }));
        assert_eq!(op.calls, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::ZERO,
        };
        let mut op = Scripted::new(&[]);
        assert_eq!(policy.execute(&mut op, by_payload).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts() {
        let policy = RetryPolicy::new(2).with_delay(Duration::from_millis(250));
        let mut op = Scripted::new(&[FailureClass::Transient]);

        let started = tokio::time::Instant::now();
        policy.execute(&mut op, by_payload).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
