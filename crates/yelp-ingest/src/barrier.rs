//! Reusable, poisonable rendezvous for a fixed set of async workers.
//!
//! Each [`PhaseBarrier::wait`] blocks until all parties of the current
//! generation have arrived, then releases them together and starts the next
//! generation. Poisoning releases every current and future waiter with
//! [`LoaderError::BarrierPoisoned`], so one failed worker cannot strand the
//! others.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use yelp_common::{LoaderError, Result};

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    poisoned: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Signal {
    generation: u64,
    poisoned: Option<String>,
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
    generation: u64,
}

impl BarrierWaitResult {
    /// True for exactly one party per generation: the last to arrive.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// The generation that was released.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct PhaseBarrier {
    parties: usize,
    timeout: Option<Duration>,
    state: Mutex<BarrierState>,
    signal: watch::Sender<Signal>,
}

impl PhaseBarrier {
    /// A barrier for `parties` workers. A zero count is treated as one.
    pub fn new(parties: usize, timeout: Option<Duration>) -> Self {
        let (signal, _) = watch::channel(Signal::default());
        Self {
            parties: parties.max(1),
            timeout,
            state: Mutex::new(BarrierState::default()),
            signal,
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn is_poisoned(&self) -> bool {
        self.lock_state().poisoned.is_some()
    }

    pub async fn wait(&self) -> Result<BarrierWaitResult> {
        self.wait_then(|| {}).await
    }

    /// Like [`wait`](Self::wait), but the last arriving party runs
    /// `on_release` before anyone is released.
    pub async fn wait_then<F>(&self, on_release: F) -> Result<BarrierWaitResult>
    where
        F: FnOnce() + Send,
    {
        let mut receiver = self.signal.subscribe();

        let generation = {
            let mut state = self.lock_state();
            if let Some(reason) = &state.poisoned {
                return Err(LoaderError::BarrierPoisoned(reason.clone()));
            }

            state.arrived += 1;
            if state.arrived == self.parties {
                let released = state.generation;
                state.arrived = 0;
                state.generation += 1;
                on_release();
                self.signal.send_replace(Signal {
                    generation: state.generation,
                    poisoned: None,
                });
                debug!(generation = released, parties = self.parties, "Barrier released");
                return Ok(BarrierWaitResult {
                    leader: true,
                    generation: released,
                });
            }
            state.generation
        };

        let released = move |signal: &Signal| {
            signal.generation > generation || signal.poisoned.is_some()
        };

        let outcome = match self.timeout {
            None => receiver.wait_for(released).await.map(|signal| (*signal).clone()),
            Some(limit) => match tokio::time::timeout(limit, receiver.wait_for(released)).await {
                Ok(result) => result.map(|signal| (*signal).clone()),
                Err(_) => {
                    warn!(generation, timeout = ?limit, "Barrier wait timed out");
                    self.poison(format!("barrier wait exceeded {limit:?}"));
                    return Err(LoaderError::BarrierTimeout(limit));
                },
            },
        };

        match outcome {
            Ok(signal) if signal.generation > generation => Ok(BarrierWaitResult {
                leader: false,
                generation,
            }),
            Ok(signal) => Err(LoaderError::BarrierPoisoned(
                signal.poisoned.unwrap_or_default(),
            )),
            Err(_) => Err(LoaderError::BarrierPoisoned("barrier dropped".to_string())),
        }
    }

    /// Release all waiters with an error. Later waits fail immediately.
    /// The first reason is kept.
    pub fn poison(&self, reason: impl Into<String>) {
        let mut state = self.lock_state();
        if state.poisoned.is_some() {
            return;
        }
        let reason = reason.into();
        warn!(%reason, "Poisoning phase barrier");
        state.poisoned = Some(reason.clone());
        let generation = state.generation;
        self.signal.send_replace(Signal {
            generation,
            poisoned: Some(reason),
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_releases_when_all_parties_arrive() {
        let barrier = Arc::new(PhaseBarrier::new(3, None));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                tokio::spawn(async move { barrier.wait().await.unwrap() })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let leaders = results
            .iter()
            .filter(|r| r.as_ref().unwrap().is_leader())
            .count();
        assert_eq!(leaders, 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().generation() == 0));
    }

    #[tokio::test]
    async fn test_fewer_parties_never_release() {
        let barrier = Arc::new(PhaseBarrier::new(3, None));
        let first = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        let second = barrier.wait();

        let outcome = tokio::time::timeout(Duration::from_millis(100), second).await;
        assert!(outcome.is_err(), "barrier released with 2 of 3 parties");
        assert!(!first.is_finished());
        first.abort();
    }

    #[tokio::test]
    async fn test_reusable_across_generations() {
        let barrier = Arc::new(PhaseBarrier::new(2, None));
        let passes = Arc::new(AtomicUsize::new(0));

        let worker = |barrier: Arc<PhaseBarrier>, passes: Arc<AtomicUsize>| async move {
            for expected in 0..3u64 {
                let result = barrier.wait().await.unwrap();
                assert_eq!(result.generation(), expected);
                passes.fetch_add(1, Ordering::SeqCst);
            }
        };

        let a = tokio::spawn(worker(barrier.clone(), passes.clone()));
        let b = tokio::spawn(worker(barrier.clone(), passes.clone()));
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(passes.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_release_hook_runs_once_before_release() {
        let barrier = Arc::new(PhaseBarrier::new(4, None));
        let hook_runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                let hook_runs = hook_runs.clone();
                tokio::spawn(async move {
                    let counter = hook_runs.clone();
                    barrier
                        .wait_then(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .await
                        .unwrap();
                    hook_runs.load(Ordering::SeqCst)
                })
            })
            .collect();

        for seen in futures::future::join_all(handles).await {
            assert_eq!(seen.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_poison_wakes_waiters_and_fails_later_waits() {
        let barrier = Arc::new(PhaseBarrier::new(3, None));
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        tokio::task::yield_now().await;

        barrier.poison("worker 2 failed");
        barrier.poison("ignored second reason");

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LoaderError::BarrierPoisoned(ref r) if r == "worker 2 failed"));
        assert!(barrier.is_poisoned());
        assert!(matches!(
            barrier.wait().await,
            Err(LoaderError::BarrierPoisoned(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_poisons_barrier() {
        let barrier = Arc::new(PhaseBarrier::new(2, Some(Duration::from_secs(5))));

        let err = barrier.wait().await.unwrap_err();
        assert!(matches!(err, LoaderError::BarrierTimeout(d) if d == Duration::from_secs(5)));
        assert!(barrier.is_poisoned());
    }
}
