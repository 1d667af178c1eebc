//! Standard test fixtures for consistent testing.
//!
//! Provides pre-built task/session/epic data: a basic task, one task per
//! status, a small epic with subtasks for hierarchy tests, and bulk
//! generators for list/filter tests.

use crate::builders::{NewTaskBuilder, SessionBuilder, TaskBuilder};
use chrono::Utc;
use cleo_core::models::*;

/// A single pending task with default field values.
pub fn create_test_task() -> Task {
    TaskBuilder::new().build()
}

/// A task fixed to the given status, with timestamps set consistently.
pub fn create_test_task_with_status(status: TaskStatus) -> Task {
    TaskBuilder::new().with_status(status).build()
}

/// `count` distinct pending tasks with ascending ids, cycling through
/// every status so list/filter tests see a mixed set.
pub fn create_test_tasks(count: usize) -> Vec<Task> {
    (1..=count)
        .map(|i| {
            let status = match i % 4 {
                0 => TaskStatus::Pending,
                1 => TaskStatus::Active,
                2 => TaskStatus::Blocked,
                _ => TaskStatus::Done,
            };
            TaskBuilder::new()
                .with_id(i as u64)
                .with_title(format!("Test task {i}"))
                .with_description(format!("Task number {i} for bulk testing"))
                .with_status(status)
                .build()
        })
        .collect()
}

/// One task for each possible `TaskStatus`.
pub fn create_tasks_in_all_statuses() -> Vec<Task> {
    [
        TaskStatus::Pending,
        TaskStatus::Active,
        TaskStatus::Blocked,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ]
    .into_iter()
    .enumerate()
    .map(|(i, status)| {
        TaskBuilder::new()
            .with_id(i as u64 + 1)
            .with_title(format!("{status} task"))
            .with_status(status)
            .build()
    })
    .collect()
}

/// An epic with three subtasks, useful for hierarchy and dependency-wave
/// tests. Returns `(epic, subtasks)`.
pub fn create_epic_with_subtasks() -> (Task, Vec<Task>) {
    let now = Utc::now();
    let epic = TaskBuilder::new()
        .with_id(1)
        .with_task_type(TaskType::Epic)
        .with_title("Ship the feature")
        .with_created_at(now)
        .build();
    let subtasks = (2..=4)
        .map(|i| {
            TaskBuilder::new()
                .with_id(i)
                .with_task_type(TaskType::Subtask)
                .with_parent(epic.id)
                .with_title(format!("Subtask {i}"))
                .with_created_at(now)
                .build()
        })
        .collect();
    (epic, subtasks)
}

/// A standard `NewTask` for testing creation.
pub fn create_new_task() -> NewTask {
    NewTaskBuilder::new().build()
}

/// An active session scoped to the whole project.
pub fn create_test_session() -> Session {
    SessionBuilder::new().build()
}

/// An ended session, suitable as the `previous` half of a handoff chain.
pub fn create_ended_session() -> Session {
    let mut session = SessionBuilder::new().with_status(SessionStatus::Ended).build();
    session.ended_at = Some(Utc::now());
    session
}
