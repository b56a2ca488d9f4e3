//! Bounded concurrent runner for per-shard jobs.
//!
//! Jobs run as futures on the caller's task, at most `workers` at a time.
//! After the first failure no new job starts; jobs already running are
//! drained so their transactions finish one way or the other.

use std::collections::BTreeMap;
use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::{Error, Result};

/// What a pool run produced.
#[derive(Debug)]
pub struct PoolOutcome<T> {
    /// Results of successful jobs, keyed by job index.
    pub completed: BTreeMap<usize, T>,
    /// First failure observed, with its job index.
    pub error: Option<(usize, Error)>,
    /// Jobs that never started because of an earlier failure.
    pub skipped: Vec<usize>,
}

impl<T> PoolOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Completed results in index order, or the first error.
    pub fn into_result(self) -> Result<BTreeMap<usize, T>> {
        match self.error {
            Some((_, e)) => Err(e),
            None => Ok(self.completed),
        }
    }
}

/// Run `job(index)` for every index with at most `workers` in flight.
pub async fn run_bounded<I, F, Fut, T>(indices: I, workers: usize, job: F) -> PoolOutcome<T>
where
    I: IntoIterator<Item = usize>,
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let workers = workers.max(1);
    let mut pending = indices.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut outcome = PoolOutcome { completed: BTreeMap::new(), error: None, skipped: Vec::new() };

    let schedule = |index: usize| {
        let fut = job(index);
        async move { (index, fut.await) }
    };

    for index in pending.by_ref().take(workers) {
        in_flight.push(schedule(index));
    }

    while let Some((index, result)) = in_flight.next().await {
        match result {
            Ok(value) => {
                outcome.completed.insert(index, value);
            }
            Err(e) => {
                if outcome.error.is_none() {
                    tracing::error!(job = index, error = %e, "job failed, draining in-flight jobs");
                    outcome.error = Some((index, e));
                } else {
                    tracing::warn!(job = index, error = %e, "additional job failure while draining");
                }
            }
        }
        if outcome.error.is_none() {
            if let Some(next) = pending.next() {
                in_flight.push(schedule(next));
            }
        }
    }

    outcome.skipped = pending.collect();
    if !outcome.skipped.is_empty() {
        tracing::warn!(skipped = outcome.skipped.len(), "jobs not started after failure");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_jobs_complete() {
        let outcome = run_bounded(0..10, 3, |i| async move { Ok(i * 2) }).await;
        assert!(outcome.is_ok());
        let done = outcome.into_result().unwrap();
        assert_eq!(done.len(), 10);
        assert_eq!(done[&7], 14);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let outcome = run_bounded(0..12, 4, |_| {
            let (running, peak) = (&running, &peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(outcome.is_ok());
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_failure_stops_scheduling() {
        let started = AtomicUsize::new(0);
        let outcome = run_bounded(0..20, 2, |i| {
            let started = &started;
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    return Err(Error::Query("boom".into()));
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                Ok(i)
            }
        })
        .await;
        let (failed, _) = outcome.error.as_ref().unwrap();
        assert_eq!(*failed, 1);
        assert!(started.load(Ordering::SeqCst) < 20);
        assert_eq!(
            outcome.completed.len() + outcome.skipped.len() + 1,
            20
        );
        assert!(!outcome.completed.contains_key(&1));
    }
}
