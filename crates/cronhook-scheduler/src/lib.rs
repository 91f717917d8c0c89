//! `cronhook-scheduler`: task store and dispatch engine.
//!
//! # Overview
//!
//! Tasks live in a SQLite `tasks` table ([`manager::TaskManager`]). The
//! [`engine::DispatchEngine`] wires four pieces around that store:
//!
//! | Piece                       | Role                                             |
//! |-----------------------------|--------------------------------------------------|
//! | [`poller::DuePoller`]       | Claims due tasks on a fixed interval             |
//! | [`queue::DispatchQueue`]    | Bounded FIFO; overflow is released, not blocked  |
//! | [`pool::WorkerPool`]        | N workers running callbacks to completion        |
//! | [`recorder::ResultRecorder`]| Stores the result and advances the task          |
//!
//! # Triggers
//!
//! | Variant  | Behaviour                                       |
//! |----------|-------------------------------------------------|
//! | `OneOff` | Single fire at an absolute UTC instant          |
//! | `Cron`   | 5-field cron expression, evaluated in UTC       |

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manager;
pub mod poller;
pub mod pool;
pub mod queue;
pub mod recorder;
pub mod schedule;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use engine::{DispatchEngine, RunningEngine};
pub use error::{Result, SchedulerError};
pub use executor::{CallbackExecutor, HttpExecutor};
pub use manager::{TaskFilter, TaskManager};
pub use store::TaskStore;
pub use types::{
    Action, ActionUpdate, CallbackOutcome, Execution, NewTask, Task, TaskResult, TaskStatus,
    TaskUpdate, Trigger,
};
