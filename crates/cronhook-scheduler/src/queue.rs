use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::types::Task;

/// Why a task could not be handed off. The task is returned to the caller.
#[derive(Debug)]
pub enum EnqueueError {
    Full(Task),
    Closed(Task),
}

impl EnqueueError {
    pub fn into_task(self) -> Task {
        match self {
            EnqueueError::Full(task) | EnqueueError::Closed(task) => task,
        }
    }
}

struct QueueState {
    buf: VecDeque<Task>,
    closed: bool,
}

/// Bounded FIFO between the poller and the worker pool.
///
/// Enqueue never waits: a full queue hands the task straight back so the
/// poller can release its claim. Dequeue waits for an item, cancellation, or
/// close.
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    // Every critical section leaves the state consistent, so a poisoned lock
    // is still usable.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_enqueue(&self, task: Task) -> Result<(), EnqueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(EnqueueError::Closed(task));
            }
            if state.buf.len() >= self.capacity {
                return Err(EnqueueError::Full(task));
            }
            state.buf.push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next task in FIFO order.
    ///
    /// Returns `None` once `cancel` fires (even if items remain buffered) or
    /// the queue is closed and empty.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<Task> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            // Register interest before inspecting the buffer so a push between
            // the check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(task) = state.buf.pop_front() {
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Refuse further enqueues and wake every waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Remove and return everything still buffered.
    pub fn drain(&self) -> Vec<Task> {
        self.lock().buf.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
