use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::executor::CallbackExecutor;
use crate::queue::DispatchQueue;
use crate::recorder::ResultRecorder;

/// Fixed set of workers draining the dispatch queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Each runs until `cancel` fires or the queue is
    /// closed and empty, always finishing the task it holds.
    pub fn start(
        size: usize,
        queue: Arc<DispatchQueue>,
        executor: Arc<dyn CallbackExecutor>,
        recorder: Arc<ResultRecorder>,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..size.max(1))
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let executor = Arc::clone(&executor);
                let recorder = Arc::clone(&recorder);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    debug!(worker, "dispatch worker started");
                    while let Some(task) = queue.dequeue(&cancel).await {
                        let execution = executor.execute(&task).await;
                        // Errors are logged by the recorder; the claim is left
                        // for recovery.
                        if let Err(e) = recorder.record(&task, &execution, Utc::now()) {
                            error!(worker, task_id = %task.id, "failed to record execution: {e}");
                        }
                    }
                    debug!(worker, "dispatch worker stopped");
                })
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "worker pool started");
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Call after cancelling the token or
    /// closing the queue; in-flight tasks run to completion.
    pub async fn stop(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("dispatch worker panicked: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskStore;
    use crate::test_support::{memory_store, one_off};
    use crate::types::{CallbackOutcome, Execution, Task, TaskStatus};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers 200 after a fixed delay and counts finished calls.
    struct SlowExecutor {
        delay: Duration,
        done: AtomicUsize,
    }

    #[async_trait]
    impl CallbackExecutor for SlowExecutor {
        async fn execute(&self, _task: &Task) -> Execution {
            let run_at = Utc::now();
            tokio::time::sleep(self.delay).await;
            self.done.fetch_add(1, Ordering::SeqCst);
            Execution {
                run_at,
                duration_ms: self.delay.as_millis() as u64,
                outcome: CallbackOutcome::Response {
                    status_code: 200,
                    headers: Value::Object(Default::default()),
                    body: Value::Null,
                },
            }
        }
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_work() {
        let store = Arc::new(memory_store());
        let now = Utc::now();
        let created = store
            .create_task(one_off("slow", now - chrono::Duration::seconds(1)))
            .unwrap();
        let queue = Arc::new(DispatchQueue::new(4));
        for task in store.fetch_due_tasks(now).unwrap() {
            queue.try_enqueue(task).unwrap();
        }

        let executor = Arc::new(SlowExecutor {
            delay: Duration::from_millis(200),
            done: AtomicUsize::new(0),
        });
        let recorder = Arc::new(ResultRecorder::new(store.clone()));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(2, queue.clone(), executor.clone(), recorder, cancel.clone());
        assert_eq!(pool.size(), 2);

        // Let a worker pick the task up, then cancel mid-call.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        pool.stop().await;

        assert_eq!(executor.done.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_task(&created.id).unwrap().status, TaskStatus::Completed);
        assert_eq!(store.list_task_results(&created.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_drained_before_exit() {
        let store = Arc::new(memory_store());
        let now = Utc::now();
        for i in 0..3 {
            store
                .create_task(one_off(&format!("t{i}"), now - chrono::Duration::seconds(1)))
                .unwrap();
        }
        let queue = Arc::new(DispatchQueue::new(8));
        for task in store.fetch_due_tasks(now).unwrap() {
            queue.try_enqueue(task).unwrap();
        }
        queue.close();

        let executor = Arc::new(SlowExecutor {
            delay: Duration::from_millis(5),
            done: AtomicUsize::new(0),
        });
        let recorder = Arc::new(ResultRecorder::new(store.clone()));
        let pool = WorkerPool::start(2, queue, executor.clone(), recorder, CancellationToken::new());
        pool.stop().await;

        assert_eq!(executor.done.load(Ordering::SeqCst), 3);
        assert_eq!(store.list_all_results().unwrap().len(), 3);
    }
}
