//! Single-worker task queue with blocking and fire-and-forget submission.
//!
//! Store writes that must not block the calling task are submitted here.
//! One long-lived worker drains the queue in submission order, so tasks
//! submitted to the same queue execute FIFO; nothing is guaranteed across
//! different queues.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::EngineError;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A FIFO queue of units of work drained by one background worker.
#[derive(Debug)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    worker: JoinHandle<()>,
}

impl TaskQueue {
    /// Spawn the worker and return the queue handle.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
            tracing::debug!("Task queue worker stopped");
        });
        Self { tx, worker }
    }

    /// Submit a unit of work without waiting for it to complete.
    ///
    /// Silently drops the work if the queue has been shut down; by then
    /// the owning context is being torn down anyway.
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Box::pin(work)).is_err() {
            tracing::warn!("Task submitted after queue shutdown; dropped");
        }
    }

    /// Submit a unit of work and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TaskQueue`] if the queue has shut down before
    /// the work completed.
    pub async fn submit_wait<F, T>(&self, work: F) -> Result<T, EngineError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(async move {
            let result = work.await;
            // Receiver dropping just means the caller stopped waiting.
            let _ = done_tx.send(result);
        });
        done_rx
            .await
            .map_err(|_| EngineError::TaskQueue("queue shut down before task completed".to_owned()))
    }

    /// Stop accepting work and wait for queued tasks to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Task queue worker join failed");
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn submit_wait_returns_the_result() {
        let queue = TaskQueue::new();
        let out = queue.submit_wait(async { 40 + 2 }).await.expect("result");
        assert_eq!(out, 42);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let queue = TaskQueue::new();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        for i in 0..10_u32 {
            let seen = Arc::clone(&seen);
            queue.submit(async move {
                seen.lock().await.push(i);
            });
        }
        // A blocking submit after the batch acts as a barrier.
        queue.submit_wait(async {}).await.expect("barrier");
        let seen = seen.lock().await;
        assert_eq!(*seen, (0..10).collect::<Vec<u32>>());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_queued_work() {
        let queue = TaskQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            queue.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
