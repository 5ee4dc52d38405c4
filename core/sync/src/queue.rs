//! Sequential task queue.
//!
//! Every mutation of the persisted sync state runs as a task on this queue.
//! Tasks start in the order they were posted and never overlap, which is what
//! keeps independently triggered chains (user edits, timers, network
//! callbacks) from interleaving their reads and writes.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use attrsync_common::{Error, Result};

type BoxedTask = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct QueuedTask {
    label: &'static str,
    task: BoxedTask,
}

/// Posting side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct SequentialTaskQueue {
    task_tx: mpsc::UnboundedSender<QueuedTask>,
}

impl SequentialTaskQueue {
    /// Create a queue and the worker that drains it.
    ///
    /// The worker must be run (usually spawned) for tasks to execute.
    pub fn new() -> (Self, TaskQueueWorker) {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        (Self { task_tx }, TaskQueueWorker { task_rx })
    }

    /// Create a queue and spawn its worker on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (queue, worker) = Self::new();
        let handle = tokio::spawn(worker.run());
        (queue, handle)
    }

    /// Post a task without waiting for it.
    ///
    /// A failing task is logged by the worker and does not stop the queue.
    pub fn post<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let queued = QueuedTask {
            label,
            task: Box::pin(task),
        };
        if self.task_tx.send(queued).is_err() {
            warn!("Task queue is closed, dropping task '{}'", label);
        }
    }

    /// Post a task and wait for its result.
    ///
    /// Must not be awaited from inside another queued task: the outer task
    /// would wait on a task that can only start after it finishes.
    pub async fn run<F, T>(&self, label: &'static str, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.post(label, async move {
            let _ = result_tx.send(task.await);
            Ok(())
        });

        result_rx
            .await
            .map_err(|_| Error::Closed(format!("Task '{}' did not complete", label)))?
    }

    /// Resolve once every task posted before this call has finished.
    pub async fn flush(&self) -> Result<()> {
        self.run("flush", async { Ok(()) }).await
    }
}

/// Worker side of the queue.
pub struct TaskQueueWorker {
    task_rx: mpsc::UnboundedReceiver<QueuedTask>,
}

impl TaskQueueWorker {
    /// Run tasks one at a time until every queue handle is dropped.
    pub async fn run(mut self) {
        info!("Task queue started");

        while let Some(QueuedTask { label, task }) = self.task_rx.recv().await {
            debug!("Running task '{}'", label);
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Task '{}' failed: {}", label, e),
                Err(_) => error!("Task '{}' panicked", label),
            }
        }

        info!("Task queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn explode() -> Result<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_tasks_run_in_fifo_order() {
        let (queue, _worker) = SequentialTaskQueue::spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..5u64 {
            let order = order.clone();
            queue.post("push", async move {
                // Earlier tasks sleep longer; FIFO must still hold.
                tokio::time::sleep(Duration::from_millis(10 * (5 - n))).await;
                order.lock().unwrap().push(n);
                Ok(())
            });
        }

        queue.flush().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (queue, _worker) = SequentialTaskQueue::spawn();
        let running = Arc::new(Mutex::new(0usize));
        let peak = Arc::new(Mutex::new(0usize));

        for _ in 0..4 {
            let running = running.clone();
            let peak = peak.clone();
            queue.post("overlap", async move {
                {
                    let mut r = running.lock().unwrap();
                    *r += 1;
                    let mut p = peak.lock().unwrap();
                    *p = (*p).max(*r);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                *running.lock().unwrap() -= 1;
                Ok(())
            });
        }

        queue.flush().await.unwrap();
        assert_eq!(*peak.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_queue() {
        let (queue, _worker) = SequentialTaskQueue::spawn();

        queue.post("fails", async { Err(Error::Network("down".to_string())) });
        queue.post("panics", async { explode() });

        let value = queue.run("after", async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_returns_task_error() {
        let (queue, _worker) = SequentialTaskQueue::spawn();

        let result: Result<()> = queue
            .run("rejects", async { Err(Error::Capacity("full".to_string())) })
            .await;

        assert!(matches!(result, Err(Error::Capacity(_))));
    }

    #[tokio::test]
    async fn test_panicking_run_reports_closed() {
        let (queue, _worker) = SequentialTaskQueue::spawn();

        let result: Result<()> = queue.run("panics", async { explode() }).await;

        assert!(matches!(result, Err(Error::Closed(_))));
    }
}
