use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::queue::{DispatchQueue, EnqueueError};
use crate::store::TaskStore;
use crate::types::{Task, TaskStatus};

/// Outcome of one polling cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Tasks claimed from the store.
    pub fetched: usize,
    /// Tasks handed to the dispatch queue.
    pub queued: usize,
    /// Tasks that did not fit; their claims were released.
    pub deferred: usize,
}

/// Periodically claims due tasks and feeds them to the dispatch queue.
pub struct DuePoller {
    store: Arc<dyn TaskStore>,
    queue: Arc<DispatchQueue>,
    interval: Duration,
}

impl DuePoller {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<DispatchQueue>, interval: Duration) -> Self {
        Self {
            store,
            queue,
            interval,
        }
    }

    /// Run a single cycle against `now`.
    ///
    /// Never waits on the queue. A task that does not fit goes back to
    /// `scheduled` with its `next_run` untouched and is picked up next cycle.
    pub fn poll_once(&self, now: DateTime<Utc>) -> Result<PollReport> {
        let due = self.store.fetch_due_tasks(now)?;
        let mut report = PollReport {
            fetched: due.len(),
            ..Default::default()
        };

        for task in due {
            match self.queue.try_enqueue(task) {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    let reason = match &e {
                        EnqueueError::Full(_) => "dispatch queue full",
                        EnqueueError::Closed(_) => "dispatch queue closed",
                    };
                    let task = e.into_task();
                    warn!(task_id = %task.id, "{reason}; task deferred to next poll");
                    self.release(&task);
                    report.deferred += 1;
                }
            }
        }
        Ok(report)
    }

    fn release(&self, task: &Task) {
        match self
            .store
            .update_task_status(&task.id, TaskStatus::Scheduled, task.next_run)
        {
            Ok(_) => {}
            Err(SchedulerError::TaskCanceled { .. }) => {
                debug!(task_id = %task.id, "deferred task was canceled meanwhile");
            }
            Err(e) => error!(task_id = %task.id, "failed to release claim: {e}"),
        }
    }

    /// Poll on a fixed interval until `cancel` fires.
    ///
    /// The first cycle runs one full interval after start. Ticks missed while
    /// a slow cycle runs are skipped rather than bunched up.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "due-task poller started");
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("due-task poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_once(Utc::now()) {
                        Ok(report) if report.fetched == 0 => debug!("no due tasks"),
                        Ok(report) => info!(
                            fetched = report.fetched,
                            queued = report.queued,
                            deferred = report.deferred,
                            "poll cycle complete"
                        ),
                        Err(e) => error!("poll cycle failed: {e}"),
                    }
                }
            }
        }
    }
}
