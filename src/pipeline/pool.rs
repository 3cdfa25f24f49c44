//! Bounded worker pools with drain-and-replace resizing.
//!
//! A pool is a semaphore generation. Every task takes its permit from the
//! generation that was current when it was spawned and keeps that generation
//! alive until it finishes, so a resize never strands queued work: tasks
//! spawned before the resize run on the old bound, tasks spawned after it on
//! the new one. [`WorkerPool::resize`] then waits up to a grace period for
//! the old generation to drain.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug)]
struct Generation {
    permits: Arc<Semaphore>,
    size: usize,
}

impl Generation {
    fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }
}

/// How a resize finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOutcome {
    pub old_size: usize,
    pub new_size: usize,
    /// `false` when the old generation still had running work at the end of
    /// the grace period. That work still runs to completion.
    pub drained: bool,
}

#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    current: Mutex<Generation>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            current: Mutex::new(Generation::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.lock().size
    }

    /// Idle permits in the current generation.
    pub fn available(&self) -> usize {
        self.lock().permits.available_permits()
    }

    fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.lock().permits)
    }

    /// Run an async task once a permit is free.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits();
        tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            task.await
        })
    }

    /// Run blocking work on tokio's blocking threads once a permit is free.
    ///
    /// The inner result carries the blocking thread's panic or cancellation.
    pub fn spawn_blocking<F, R>(&self, work: F) -> JoinHandle<Result<R, JoinError>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permits = self.permits();
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            tokio::task::spawn_blocking(work).await
        })
    }

    /// Replace the pool with one of `new_size` workers.
    ///
    /// The swap is immediate. The old generation gets `grace` to finish what
    /// it holds; after that it is released and its remaining tasks finish on
    /// their own.
    pub async fn resize(&self, new_size: usize, grace: Duration) -> ResizeOutcome {
        let old = {
            let mut current = self.lock();
            std::mem::replace(&mut *current, Generation::new(new_size))
        };
        let new_size = new_size.max(1);
        let wanted = u32::try_from(old.size).unwrap_or(u32::MAX);
        let drained = match tokio::time::timeout(grace, old.permits.acquire_many(wanted)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "{} pool: old generation of {} still busy after {} ms; letting it finish",
                    self.name,
                    old.size,
                    grace.as_millis()
                );
                false
            }
        };
        debug!("{} pool resized {} → {}", self.name, old.size, new_size);
        ResizeOutcome {
            old_size: old.size,
            new_size,
            drained,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Generation> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    /// Spawn `n` tasks that each hold a permit for `hold`, counted on `gauge`.
    fn spawn_held(
        pool: &WorkerPool,
        n: usize,
        hold: Duration,
        gauge: &Arc<Gauge>,
    ) -> Vec<JoinHandle<()>> {
        (0..n)
            .map(|_| {
                let gauge = Arc::clone(gauge);
                pool.spawn(async move {
                    let now = gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
                    gauge.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(hold).await;
                    gauge.running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect()
    }

    /// Highest concurrency observed over `n` held tasks.
    async fn peak_concurrency(pool: &WorkerPool, n: usize, hold: Duration) -> usize {
        let gauge = Arc::new(Gauge::default());
        for h in spawn_held(pool, n, hold, &gauge) {
            h.await.unwrap();
        }
        gauge.peak.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn bound_is_respected() {
        let pool = WorkerPool::new("test", 2);
        assert_eq!(peak_concurrency(&pool, 8, Duration::from_millis(50)).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_while_idle_changes_bound() {
        let pool = WorkerPool::new("test", 1);
        let outcome = pool.resize(3, Duration::from_secs(5)).await;
        assert!(outcome.drained);
        assert_eq!(outcome.old_size, 1);
        assert_eq!(pool.size(), 3);
        assert_eq!(peak_concurrency(&pool, 9, Duration::from_millis(50)).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_keeps_queued_work() {
        let pool = WorkerPool::new("test", 1);
        let done = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let done = Arc::clone(&done);
                pool.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        tokio::task::yield_now().await;

        // Grace shorter than the queue: the old generation keeps running.
        let outcome = pool.resize(4, Duration::from_millis(150)).await;
        assert!(!outcome.drained);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_resize_splits_old_and_new_bounds() {
        let pool = WorkerPool::new("test", 2);
        let before = Arc::new(Gauge::default());
        let after = Arc::new(Gauge::default());

        let old = spawn_held(&pool, 6, Duration::from_millis(100), &before);
        tokio::task::yield_now().await;
        let outcome = pool.resize(4, Duration::from_millis(10)).await;
        assert!(!outcome.drained);
        let new = spawn_held(&pool, 8, Duration::from_millis(100), &after);

        for h in old.into_iter().chain(new) {
            h.await.unwrap();
        }
        assert_eq!(before.peak.load(Ordering::SeqCst), 2);
        assert_eq!(after.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn spawn_blocking_returns_value() {
        let pool = WorkerPool::new("test", 2);
        let v = pool.spawn_blocking(|| 21 * 2).await.unwrap().unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn spawn_blocking_panic_surfaces_as_join_error() {
        let pool = WorkerPool::new("test", 1);
        let err = pool
            .spawn_blocking(|| -> u8 { panic!("boom") })
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_panic());
        // The permit was released.
        assert_eq!(pool.spawn_blocking(|| 1).await.unwrap().unwrap(), 1);
    }
}
