//! Orchestration helpers and the coherence-check composite (§4.6). Pure
//! read operations over the task graph; ready/next resolve the open
//! question in §9 by NOT filtering on the parent epic's status — see
//! DESIGN.md for the record of that decision.

use std::collections::HashSet;
use std::sync::Arc;

use cleo_core::error::Result;
use cleo_core::models::*;
use cleo_core::store::Store;

use crate::task_graph::TaskGraphEngine;

pub struct OrchestrationEngine<S: Store> {
    store: Arc<S>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EpicStatus {
    pub epic_id: TaskId,
    pub counts_by_status: std::collections::HashMap<String, usize>,
    pub total: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SpawnContext {
    pub task: Task,
    pub parent_chain: Vec<Task>,
    pub prior_decisions: Vec<Decision>,
    pub estimated_tokens: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub enum Readiness {
    Ready,
    Blocked(Vec<TaskId>),
}

impl<S: Store> OrchestrationEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn status(&self, epic_id: TaskId) -> Result<EpicStatus> {
        let descendants = self.descendants_of(epic_id).await?;
        let mut counts = std::collections::HashMap::new();
        for t in &descendants {
            *counts.entry(t.status.to_string()).or_insert(0usize) += 1;
        }
        Ok(EpicStatus {
            epic_id,
            total: descendants.len(),
            counts_by_status: counts,
        })
    }

    /// `ready`: pending, every dependency done. The GLOSSARY also requires
    /// "in current session scope" — callers filter that externally via
    /// `SessionEngine::scope_checker`, keeping this function pure over the
    /// graph alone.
    pub async fn ready(&self, epic_id: Option<TaskId>) -> Result<Vec<Task>> {
        let tasks = self.scoped(epic_id).await?;
        let by_id: std::collections::HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let mut ready: Vec<Task> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.depends.iter().all(|d| by_id.get(d).map(|dep| dep.status == TaskStatus::Done).unwrap_or(true)))
            .cloned()
            .collect();
        ready.sort_by_key(|t| t.id);
        Ok(ready)
    }

    /// `next`: the first ready task, ordered by priority then ID
    /// (S1: lower ID breaks ties at equal priority).
    pub async fn next(&self, epic_id: Option<TaskId>) -> Result<Option<Task>> {
        let mut ready = self.ready(epic_id).await?;
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(ready.into_iter().next())
    }

    pub async fn waves(&self, epic_id: TaskId, config: crate::task_graph::GraphConfig) -> Result<Vec<Vec<TaskId>>> {
        let engine = TaskGraphEngine::new(self.store.clone(), config);
        engine.get_execution_waves(Some(epic_id)).await
    }

    pub async fn validate(&self, task_id: TaskId) -> Result<Readiness> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| cleo_core::error::CleoError::not_found(format!("task {task_id}")))?;
        if task.status != TaskStatus::Pending {
            return Ok(Readiness::Blocked(vec![task_id]));
        }
        let mut blockers = Vec::new();
        for dep in &task.depends {
            if let Some(dep_task) = self.store.get_task(*dep).await? {
                if dep_task.status != TaskStatus::Done {
                    blockers.push(*dep);
                }
            }
        }
        if blockers.is_empty() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::Blocked(blockers))
        }
    }

    /// `spawn`: a bundled context block — task, parent chain, and any
    /// decisions implemented by it — with a rough token estimate.
    pub async fn spawn(&self, task_id: TaskId) -> Result<SpawnContext> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| cleo_core::error::CleoError::not_found(format!("task {task_id}")))?;

        let mut parent_chain = Vec::new();
        let mut cursor = task.parent_id;
        while let Some(id) = cursor {
            let parent = self
                .store
                .get_task(id)
                .await?
                .ok_or_else(|| cleo_core::error::CleoError::not_found(format!("task {id}")))?;
            cursor = parent.parent_id;
            parent_chain.push(parent);
        }

        let all_decisions = self.store.list_decisions(Default::default()).await?;
        let mut prior_decisions = Vec::new();
        for decision in all_decisions {
            let links = self.store.task_decisions_for(decision.id).await?;
            if links.iter().any(|l| l.task_id == task_id) {
                prior_decisions.push(decision);
            }
        }

        let estimated_tokens =
            (task.title.len() + task.description.len() + task.notes.iter().map(|n| n.len()).sum::<usize>()) as u64 / 4;

        Ok(SpawnContext {
            task,
            parent_chain,
            prior_decisions,
            estimated_tokens,
        })
    }

    pub async fn startup(&self) -> Result<Vec<Task>> {
        self.ready(None).await
    }

    async fn scoped(&self, epic_id: Option<TaskId>) -> Result<Vec<Task>> {
        match epic_id {
            None => self.store.list_tasks(TaskFilter::default()).await,
            Some(root) => self.descendants_of(root).await,
        }
    }

    async fn descendants_of(&self, root: TaskId) -> Result<Vec<Task>> {
        let all = self.store.list_tasks(TaskFilter::default()).await?;
        let mut scope = HashSet::new();
        scope.insert(root);
        let mut changed = true;
        while changed {
            changed = false;
            for t in &all {
                if let Some(parent) = t.parent_id {
                    if scope.contains(&parent) && scope.insert(t.id) {
                        changed = true;
                    }
                }
            }
        }
        Ok(all.into_iter().filter(|t| scope.contains(&t.id)).collect())
    }
}
