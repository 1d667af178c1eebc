//! Field-level validators and the rule-based invariant suite (§3, §8).
//!
//! Two layers, per §4.6: structural (field shape, enforced here with plain
//! functions rather than a schema library, since the domain has a fixed,
//! small set of fields) and rule-based (the universal invariants, each a
//! pure function over a `TaskSetView` so the store, the engines, and tests
//! can all run the same checks without talking to SQL).

use crate::error::{CleoError, Result, RuleViolation};
use crate::models::{NewTask, Task, TaskId, TaskStatus};
use std::collections::{HashMap, HashSet};

pub struct FieldValidator;

impl FieldValidator {
    /// Title and description must both be non-empty once trimmed, and
    /// must differ from one another (invariant 6, §8).
    pub fn validate_title_and_description(title: &str, description: &str) -> Result<()> {
        let mut violations = Vec::new();
        if title.trim().is_empty() {
            violations.push(RuleViolation::new("title", "title must not be empty"));
        }
        if description.trim().is_empty() {
            violations.push(RuleViolation::new("description", "description must not be empty"));
        }
        if title.trim() == description.trim() && !title.trim().is_empty() {
            violations.push(RuleViolation::new(
                "title-vs-description",
                "title and description must differ",
            ));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CleoError::validation(violations))
        }
    }

    pub fn validate_new_task(new_task: &NewTask) -> Result<()> {
        Self::validate_title_and_description(&new_task.title, &new_task.description)
    }

    /// An agent identifier drawn from the configured whitelist (§4.2).
    pub fn validate_agent_identifier(name: &str, whitelist: &[String]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CleoError::invalid_input("agent identifier must not be empty"));
        }
        if !whitelist.iter().any(|a| a == name) {
            return Err(CleoError::invalid_input(format!(
                "agent '{name}' is not in the configured whitelist"
            )));
        }
        Ok(())
    }
}

/// A read-only snapshot the rule suite runs against. The store and the
/// engines both produce one of these; the rule functions never touch SQL
/// directly (§4.6, §9's "read-only view" design note).
pub struct TaskSetView<'a> {
    pub active: &'a [Task],
    pub archived: &'a [Task],
    pub stored_checksum: &'a str,
}

impl<'a> TaskSetView<'a> {
    pub fn all(&self) -> impl Iterator<Item = &Task> {
        self.active.iter().chain(self.archived.iter())
    }
}

/// Deterministic hash over sorted task IDs + status + updatedAt (§3, §4.1,
/// invariant 8). SHA-256 truncated to a hex digest; any stable hash would
/// satisfy the spec, SHA-256 is what the store's checksum column stores.
pub fn compute_checksum(tasks: &[Task]) -> String {
    use sha2::{Digest, Sha256};
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by_key(|t| t.id);
    let mut hasher = Sha256::new();
    for t in sorted {
        hasher.update(t.id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(t.status.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(t.updated_at.to_rfc3339().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Runs the full universal-invariant suite (§8) and returns every
/// violation found, never stopping at the first one (§7).
pub fn check_invariants(view: &TaskSetView<'_>) -> Vec<RuleViolation> {
    let mut violations = Vec::new();
    let by_id: HashMap<TaskId, &Task> = view.all().map(|t| (t.id, t)).collect();

    // 1. done => completedAt set.
    for t in view.all() {
        if t.status == TaskStatus::Done && t.completed_at.is_none() {
            violations.push(RuleViolation::new(
                "done-has-completed-at",
                format!("{} is done but has no completedAt", t.id),
            ));
        }
    }

    // 2. blocked => blockedBy non-empty.
    for t in view.all() {
        if t.status == TaskStatus::Blocked
            && t.blocked_by.as_deref().unwrap_or("").trim().is_empty()
        {
            violations.push(RuleViolation::new(
                "blocked-has-reason",
                format!("{} is blocked but blockedBy is empty", t.id),
            ));
        }
    }

    // 3. at most one active task system-wide.
    let active_count = view.all().filter(|t| t.status == TaskStatus::Active).count();
    if active_count > 1 {
        violations.push(RuleViolation::new(
            "single-active-task",
            format!("{active_count} tasks are active; at most one is allowed"),
        ));
    }

    // 4. parent chain depth <= 4 and acyclic.
    for t in view.all() {
        match parent_chain_depth(t.id, &by_id) {
            Ok(depth) if depth > 4 => violations.push(RuleViolation::new(
                "max-hierarchy-depth",
                format!("{} has parent-chain depth {depth} > 4", t.id),
            )),
            Err(()) => violations.push(RuleViolation::new(
                "acyclic-hierarchy",
                format!("{} participates in a parent-chain cycle", t.id),
            )),
            _ => {}
        }
    }

    // 5. depends graph has no cycle.
    if let Err(cycle) = detect_dependency_cycle(&by_id) {
        violations.push(RuleViolation::new(
            "acyclic-dependencies",
            format!("dependency cycle among: {cycle:?}"),
        ));
    }

    // 6. title != description.
    for t in view.all() {
        if t.title.trim() == t.description.trim() {
            violations.push(RuleViolation::new(
                "title-vs-description",
                format!("{} has identical title and description", t.id),
            ));
        }
    }

    // 7. unique IDs across active + archive.
    let mut seen = HashSet::new();
    for t in view.active.iter().chain(view.archived.iter()) {
        if !seen.insert(t.id) {
            violations.push(RuleViolation::new(
                "unique-id",
                format!("{} appears more than once across active+archive", t.id),
            ));
        }
    }

    // 8. stored checksum matches computed checksum.
    let computed = compute_checksum(view.active);
    if computed != view.stored_checksum {
        violations.push(RuleViolation::new(
            "checksum",
            "stored checksum does not match the computed checksum",
        ));
    }

    // done-with-incomplete-subtasks is forbidden.
    for t in view.all() {
        if t.status == TaskStatus::Done {
            let incomplete_children = view
                .all()
                .filter(|c| c.parent_id == Some(t.id) && c.status != TaskStatus::Done && c.status != TaskStatus::Cancelled)
                .count();
            if incomplete_children > 0 {
                violations.push(RuleViolation::new(
                    "no-done-with-open-subtasks",
                    format!("{} is done but has {incomplete_children} open subtasks", t.id),
                ));
            }
        }
    }

    violations
}

fn parent_chain_depth(start: TaskId, by_id: &HashMap<TaskId, &Task>) -> std::result::Result<u32, ()> {
    let mut depth = 0;
    let mut current = start;
    let mut visited = HashSet::new();
    visited.insert(current);
    loop {
        let Some(task) = by_id.get(&current) else { break };
        match task.parent_id {
            None => break,
            Some(parent) => {
                if !visited.insert(parent) {
                    return Err(());
                }
                depth += 1;
                current = parent;
            }
        }
    }
    Ok(depth)
}

fn detect_dependency_cycle(by_id: &HashMap<TaskId, &Task>) -> std::result::Result<(), Vec<TaskId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<TaskId, Mark> = HashMap::new();
    let mut stack = Vec::new();

    fn visit(
        id: TaskId,
        by_id: &HashMap<TaskId, &Task>,
        marks: &mut HashMap<TaskId, Mark>,
        stack: &mut Vec<TaskId>,
    ) -> std::result::Result<(), Vec<TaskId>> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let pos = stack.iter().position(|x| *x == id).unwrap_or(0);
                return Err(stack[pos..].to_vec());
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(task) = by_id.get(&id) {
            for dep in &task.depends {
                visit(*dep, by_id, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for id in by_id.keys().copied() {
        visit(id, by_id, &mut marks, &mut stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskPriority, TaskType, Verification};
    use chrono::Utc;

    fn task(id: u64, title: &str, desc: &str) -> Task {
        Task {
            id: TaskId::new(id),
            title: title.into(),
            description: desc.into(),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
            blocked_by: None,
            verification: Verification::default(),
            epic_lifecycle: None,
            created_by: None,
        }
    }

    #[test]
    fn title_equal_to_description_is_rejected() {
        let t = task(1, "same", "same");
        let view = TaskSetView {
            active: std::slice::from_ref(&t),
            archived: &[],
            stored_checksum: &compute_checksum(std::slice::from_ref(&t)),
        };
        let violations = check_invariants(&view);
        assert!(violations.iter().any(|v| v.rule == "title-vs-description"));
    }

    #[test]
    fn dependency_cycle_is_detected() {
        let mut a = task(1, "a", "task a");
        let mut b = task(2, "b", "task b");
        a.depends = vec![TaskId::new(2)];
        b.depends = vec![TaskId::new(1)];
        let tasks = vec![a, b];
        let view = TaskSetView {
            active: &tasks,
            archived: &[],
            stored_checksum: &compute_checksum(&tasks),
        };
        let violations = check_invariants(&view);
        assert!(violations.iter().any(|v| v.rule == "acyclic-dependencies"));
    }

    #[test]
    fn checksum_matches_freshly_computed_set() {
        let tasks = vec![task(1, "a", "task a")];
        let sum = compute_checksum(&tasks);
        let view = TaskSetView {
            active: &tasks,
            archived: &[],
            stored_checksum: &sum,
        };
        assert!(!check_invariants(&view).iter().any(|v| v.rule == "checksum"));
    }
}
