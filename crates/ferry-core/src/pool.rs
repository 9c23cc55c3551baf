//! Bounded worker pool for per-file download and verify tasks.
//!
//! `jobs` worker tasks drain a shared queue. Each result is sent back over a
//! channel tagged with its queue index, so callers see results in input
//! order no matter which worker finished first. Cancellation is checked
//! between tasks: once the token fires no new task starts, and running ones
//! finish normally.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs tasks on at most `jobs` concurrent tokio tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    jobs: usize,
    cancel: CancellationToken,
}

/// Results in input order. `None` marks a task that never ran.
#[derive(Debug)]
pub struct PoolOutput<R> {
    /// One slot per input item.
    pub results: Vec<Option<R>>,
    /// True when cancellation stopped the queue early.
    pub cancelled: bool,
}

impl WorkerPool {
    /// A pool of `jobs` workers; 0 is treated as 1.
    pub fn new(jobs: usize, cancel: CancellationToken) -> Self {
        Self {
            jobs: jobs.max(1),
            cancel,
        }
    }

    /// Worker count.
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Token that stops the queue.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `work` over `items` and collect the results in input order.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> PoolOutput<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
            Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
        let work = Arc::new(work);
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, R)>();

        let mut handles = Vec::with_capacity(self.jobs.min(total));
        for _ in 0..self.jobs.min(total) {
            let queue = Arc::clone(&queue);
            let work = Arc::clone(&work);
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((index, item)) = next else {
                        break;
                    };
                    let result = work(item).await;
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        while let Some((index, result)) = rx.recv().await {
            results[index] = Some(result);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("worker task failed: {e}");
            }
        }

        let cancelled = self.cancel.is_cancelled() && results.iter().any(Option::is_none);
        PoolOutput { results, cancelled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_follow_input_order() {
        let pool = WorkerPool::new(4, CancellationToken::new());
        let items: Vec<u64> = (0..20).collect();
        let out = pool
            .run(items, |n| async move {
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis(20 - n)).await;
                n * 2
            })
            .await;
        assert!(!out.cancelled);
        let got: Vec<u64> = out.results.into_iter().map(Option::unwrap).collect();
        assert_eq!(got, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(3, CancellationToken::new());
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (l, p) = (Arc::clone(&live), Arc::clone(&peak));
        pool.run((0..12).collect::<Vec<_>>(), move |_: i32| {
            let (live, peak) = (Arc::clone(&l), Arc::clone(&p));
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch() {
        let token = CancellationToken::new();
        let pool = WorkerPool::new(1, token.clone());
        let out = pool
            .run((0..5).collect::<Vec<_>>(), move |n: i32| {
                let token = token.clone();
                async move {
                    if n == 1 {
                        token.cancel();
                    }
                    n
                }
            })
            .await;
        assert!(out.cancelled);
        assert_eq!(out.results[0], Some(0));
        assert_eq!(out.results[1], Some(1));
        assert!(out.results[2..].iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn empty_input() {
        let pool = WorkerPool::new(4, CancellationToken::new());
        let out = pool.run(Vec::<u8>::new(), |n| async move { n }).await;
        assert!(out.results.is_empty());
        assert!(!out.cancelled);
    }
}
