//! Bounded-concurrency job executor.
//!
//! Jobs are futures producing one result each. Two semaphores shape the
//! flow: `running` caps parallel execution at the worker count, while
//! `slots` (twice the worker count) caps in-flight plus queued work —
//! [`JobExecutor::submit`] blocks once that threshold is reached, which is
//! the backpressure that bounds memory when an orchestrator fans out over a
//! large container.
//!
//! Completion-order iteration is provided by [`AsCompleted`], a polling
//! wrapper over the per-job oneshot channels that stays interruptible
//! through a shared cancel flag.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

/// Default worker count per pool.
pub const DEFAULT_WORKERS: usize = 10;

/// How often completion iteration re-checks the cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Receiver side of one submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Waits for the job. `None` when the job was cancelled before running.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

/// Bounded worker pool over spawned tasks.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    slots: Arc<Semaphore>,
    running: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
    workers: usize,
}

impl JobExecutor {
    /// Creates an executor with `workers` parallel workers and a pending
    /// queue of the same depth.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        debug!(workers, "creating job executor");
        Self {
            slots: Arc::new(Semaphore::new(workers * 2)),
            running: Arc::new(Semaphore::new(workers)),
            cancel: Arc::new(AtomicBool::new(false)),
            workers,
        }
    }

    /// Configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Shared cancel flag; set by [`Self::cancel_all`].
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Whether the executor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Cancels all jobs that have not started running yet.
    ///
    /// In-flight jobs finish on their own; their results are dropped by the
    /// consumer side.
    pub fn cancel_all(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Schedules a job, blocking while in-flight + queued work is at the
    /// threshold.
    pub async fn submit<F, T>(&self, job: F) -> JobHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let Ok(slot) = Arc::clone(&self.slots).acquire_owned().await else {
            // Semaphore closed: executor torn down; handle resolves empty.
            return JobHandle { rx };
        };
        let running = Arc::clone(&self.running);
        let cancel = Arc::clone(&self.cancel);
        tokio::spawn(async move {
            let _slot = slot;
            let Ok(_permit) = running.acquire_owned().await else {
                return;
            };
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            let out = job.await;
            // Receiver may be gone when the caller stopped iterating.
            let _ = tx.send(out);
        });
        JobHandle { rx }
    }
}

/// Yields job results in completion order, promptly observing cancellation.
#[derive(Debug)]
pub struct AsCompleted<T> {
    pending: FuturesUnordered<oneshot::Receiver<T>>,
    cancel: Arc<AtomicBool>,
}

impl<T> AsCompleted<T> {
    /// Wraps a batch of handles with a cancel flag to poll.
    pub fn new(
        handles: impl IntoIterator<Item = JobHandle<T>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let pending: FuturesUnordered<_> = handles.into_iter().map(|h| h.rx).collect();
        Self { pending, cancel }
    }

    /// Number of jobs not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Next completed result; `None` once drained or cancelled.
    ///
    /// Cancelled-before-run jobs are skipped silently.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return None;
            }
            if self.pending.is_empty() {
                return None;
            }
            match tokio::time::timeout(POLL_INTERVAL, self.pending.next()).await {
                Ok(Some(Ok(value))) => return Some(value),
                Ok(Some(Err(_))) => {} // job dropped without a result
                Ok(None) => return None,
                Err(_) => {} // poll tick; re-check the cancel flag
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_results_arrive_in_completion_order() {
        let executor = JobExecutor::new(4);
        let gate = Arc::new(Notify::new());

        let slow_gate = Arc::clone(&gate);
        let slow = executor
            .submit(async move {
                slow_gate.notified().await;
                "slow"
            })
            .await;
        let fast = executor.submit(async { "fast" }).await;

        let mut completed = AsCompleted::new([slow, fast], Arc::new(AtomicBool::new(false)));
        let first = completed.next().await.unwrap();
        assert_eq!(first, "fast");
        gate.notify_one();
        let second = completed.next().await.unwrap();
        assert_eq!(second, "slow");
        assert!(completed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_blocks_at_twice_worker_count() {
        let executor = JobExecutor::new(2);
        // Zero-permit gate; jobs run only once permits are added, which lets
        // the test observe the saturated state first.
        let gate = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(
                executor
                    .submit(async move {
                        let _permit = gate.acquire().await.unwrap();
                        1u32
                    })
                    .await,
            );
        }

        // Slots exhausted: the fifth submit must block until a job finishes.
        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            executor.submit(async { 1u32 }),
        )
        .await;
        assert!(blocked.is_err(), "submit should block when saturated");

        gate.add_permits(4);
        let mut completed = AsCompleted::new(handles, Arc::new(AtomicBool::new(false)));
        let mut total = 0;
        while let Some(v) = completed.next().await {
            total += v;
        }
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_cancel_skips_queued_jobs() {
        let executor = JobExecutor::new(1);
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());

        // First job occupies the single worker; wait until it really runs.
        let job_started = Arc::clone(&started);
        let job_gate = Arc::clone(&gate);
        let running = executor
            .submit(async move {
                job_started.notify_one();
                job_gate.notified().await;
                "ran"
            })
            .await;
        started.notified().await;

        // Second job sits in the queue behind the occupied worker.
        let queued = executor.submit(async { "queued" }).await;

        executor.cancel_all();
        gate.notify_one();

        assert_eq!(running.wait().await, Some("ran"));
        assert_eq!(queued.wait().await, None);
    }

    #[tokio::test]
    async fn test_as_completed_stops_on_cancel_flag() {
        let executor = JobExecutor::new(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let never = executor
            .submit(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;

        let mut completed = AsCompleted::new([never], Arc::clone(&cancel));
        cancel.store(true, Ordering::SeqCst);
        assert!(completed.next().await.is_none());
    }
}
