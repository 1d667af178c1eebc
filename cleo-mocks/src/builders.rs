//! Builder pattern implementations for easy test data construction.
//!
//! Provides fluent builders for `Task`, `NewTask`, `TaskFilter`, and
//! `Session`, each seeded with sensible defaults so a test only sets the
//! fields it cares about.

use chrono::{DateTime, Utc};
use cleo_core::models::*;

/// Builder for constructing `Task` instances in tests.
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: TaskId::new(1),
                title: "Test task".to_string(),
                description: "A task used for testing".to_string(),
                status: TaskStatus::Pending,
                priority: TaskPriority::Medium,
                task_type: TaskType::Task,
                phase: None,
                parent_id: None,
                depends: Vec::new(),
                labels: Vec::new(),
                notes: Vec::new(),
                files: Vec::new(),
                acceptance: Vec::new(),
                size: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
                cancelled_at: None,
                blocked_by: None,
                verification: Verification::default(),
                epic_lifecycle: None,
                created_by: Some("test-agent".to_string()),
            },
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.task.id = TaskId::new(id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.task.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.task.description = description.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        if status == TaskStatus::Done && self.task.completed_at.is_none() {
            self.task.completed_at = Some(Utc::now());
        }
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        if task_type == TaskType::Epic && self.task.epic_lifecycle.is_none() {
            self.task.epic_lifecycle = Some(EpicLifecycle::Active);
        }
        self
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.task.parent_id = Some(parent_id);
        self
    }

    pub fn with_depends(mut self, depends: Vec<TaskId>) -> Self {
        self.task.depends = depends;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.task.labels = labels;
        self
    }

    pub fn with_gate(mut self, gate: GateName, value: GateValue) -> Self {
        self.task.verification.gates.insert(gate, value);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for constructing `NewTask` instances in tests.
pub struct NewTaskBuilder {
    new_task: NewTask,
}

impl Default for NewTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NewTaskBuilder {
    pub fn new() -> Self {
        Self {
            new_task: NewTask {
                title: "New test task".to_string(),
                description: "A newly created test task".to_string(),
                created_by: Some("test-agent".to_string()),
                ..Default::default()
            },
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.new_task.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.new_task.description = description.into();
        self
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.new_task.parent_id = Some(parent_id);
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.new_task.task_type = Some(task_type);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.new_task.priority = Some(priority);
        self
    }

    pub fn with_depends(mut self, depends: Vec<TaskId>) -> Self {
        self.new_task.depends = depends;
        self
    }

    pub fn build(self) -> NewTask {
        self.new_task
    }
}

/// Builder for constructing `TaskFilter` instances in tests.
pub struct TaskFilterBuilder {
    filter: TaskFilter,
}

impl Default for TaskFilterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFilterBuilder {
    pub fn new() -> Self {
        Self {
            filter: TaskFilter::default(),
        }
    }

    pub fn with_status(mut self, status: Vec<TaskStatus>) -> Self {
        self.filter.status = Some(status);
        self
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.filter.parent_id = Some(parent_id);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.filter.label = Some(label.into());
        self
    }

    pub fn build(self) -> TaskFilter {
        self.filter
    }
}

/// Builder for constructing `Session` instances in tests.
pub struct SessionBuilder {
    session: Session,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            session: Session {
                id: 0,
                status: SessionStatus::Active,
                scope: SessionScope {
                    scope_type: ScopeType::Project,
                    root_task_id: None,
                    include_descendants: true,
                },
                task_work: None,
                started_at: Utc::now(),
                ended_at: None,
                suspended_at: None,
                suspend_count: 0,
                resume_count: 0,
                stats: SessionStats::default(),
                agent_identifier: Some("test-agent".to_string()),
                previous_session_id: None,
                next_session_id: None,
                handoff_json: None,
                debrief_json: None,
                handoff_consumed_at: None,
                handoff_consumed_by: None,
                grade_mode: false,
            },
        }
    }

    pub fn with_scope(mut self, scope: SessionScope) -> Self {
        self.session.scope = scope;
        self
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.session.status = status;
        self
    }

    pub fn with_previous_session(mut self, id: i64) -> Self {
        self.session.previous_session_id = Some(id);
        self
    }

    pub fn with_grade_mode(mut self, grade_mode: bool) -> Self {
        self.session.grade_mode = grade_mode;
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}
