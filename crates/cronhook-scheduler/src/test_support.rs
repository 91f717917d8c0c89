//! Fixtures shared by the unit tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::manager::TaskManager;
use crate::types::{Action, NewTask, Task, TaskStatus, Trigger};

pub(crate) fn memory_store() -> TaskManager {
    TaskManager::new(Connection::open_in_memory().unwrap()).unwrap()
}

pub(crate) fn webhook(url: &str) -> Action {
    Action {
        method: "GET".into(),
        url: url.into(),
        headers: BTreeMap::new(),
        payload: None,
    }
}

pub(crate) fn one_off(name: &str, fire_at: DateTime<Utc>) -> NewTask {
    NewTask {
        name: name.into(),
        trigger: Trigger::OneOff { fire_at },
        action: webhook("http://127.0.0.1:1/hook"),
    }
}

/// A claimed task that exists only in memory.
pub(crate) fn claimed_task(id: &str, trigger: Trigger) -> Task {
    let now = Utc::now();
    Task {
        id: id.into(),
        name: id.into(),
        trigger,
        action: webhook("http://127.0.0.1:1/hook"),
        status: TaskStatus::Claimed,
        next_run: Some(now),
        created_at: now,
        updated_at: now,
    }
}
