use std::sync::Arc;

use cronhook_core::config::DispatchConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    executor::CallbackExecutor,
    poller::DuePoller,
    pool::WorkerPool,
    queue::DispatchQueue,
    recorder::ResultRecorder,
    store::TaskStore,
    types::TaskStatus,
};

/// Wires poller, queue, worker pool and recorder around one store.
pub struct DispatchEngine {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn CallbackExecutor>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn CallbackExecutor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// Release claims left by a previous process, then spawn the poller and
    /// the worker pool. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<RunningEngine> {
        match self.store.release_claims()? {
            0 => {}
            n => warn!(count = n, "released claims orphaned by a previous run"),
        }

        let cancel = CancellationToken::new();
        let queue = Arc::new(DispatchQueue::new(self.config.queue_capacity));
        let recorder = Arc::new(ResultRecorder::new(Arc::clone(&self.store)));

        let pool = WorkerPool::start(
            self.config.workers,
            Arc::clone(&queue),
            Arc::clone(&self.executor),
            recorder,
            cancel.clone(),
        );
        let poller = DuePoller::new(
            Arc::clone(&self.store),
            Arc::clone(&queue),
            self.config.poll_interval(),
        );
        let poller = tokio::spawn(poller.run(cancel.clone()));

        info!(
            workers = pool.size(),
            queue_capacity = queue.capacity(),
            poll_interval_secs = self.config.poll_interval_secs,
            "dispatch engine started"
        );
        Ok(RunningEngine {
            store: self.store,
            queue,
            cancel,
            poller,
            pool,
        })
    }
}

/// Handle to a started engine.
pub struct RunningEngine {
    store: Arc<dyn TaskStore>,
    queue: Arc<DispatchQueue>,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    pool: WorkerPool,
}

impl RunningEngine {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling, let in-flight executions finish, and release the claims
    /// of tasks that were queued but never started.
    pub async fn shutdown(self) {
        info!("dispatch engine shutting down");
        self.cancel.cancel();
        self.queue.close();

        if let Err(e) = self.poller.await {
            error!("due-task poller panicked: {e}");
        }
        self.pool.stop().await;

        let leftover = self.queue.drain();
        let mut released = 0usize;
        for task in &leftover {
            match self
                .store
                .update_task_status(&task.id, TaskStatus::Scheduled, task.next_run)
            {
                Ok(_) => released += 1,
                Err(SchedulerError::TaskCanceled { .. }) => {}
                Err(e) => error!(task_id = %task.id, "failed to release claim at shutdown: {e}"),
            }
        }
        if !leftover.is_empty() {
            info!(released, "released claims of queued tasks");
        }
        info!("dispatch engine stopped");
    }
}
