//! The task graph engine: CRUD, hierarchy, dependency waves, cascade
//! completion, and the verification gate machine (§4.2).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use cleo_core::store::{ArchiveSource, Store};

const MAX_HIERARCHY_DEPTH: u32 = 4;

/// Graph-engine-local policy, sourced from `cleo_core::config::VerificationConfig`.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub required_gates: Vec<GateName>,
    pub max_rounds: u32,
    pub require_for_parent_auto_complete: bool,
    pub max_siblings: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            required_gates: GATE_ORDER.to_vec(),
            max_rounds: 10,
            require_for_parent_auto_complete: true,
            max_siblings: 64,
        }
    }
}

/// A reported dependency cycle: the IDs participating in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<TaskId>);

pub struct TaskGraphEngine<S: Store> {
    store: Arc<S>,
    config: GraphConfig,
}

impl<S: Store> TaskGraphEngine<S> {
    pub fn new(store: Arc<S>, config: GraphConfig) -> Self {
        Self { store, config }
    }

    pub async fn add(&self, new_task: NewTask) -> Result<Task> {
        if new_task.title == new_task.description {
            return Err(CleoError::invalid_input("title and description must differ"));
        }
        if let Some(parent_id) = new_task.parent_id {
            self.check_parent(parent_id).await?;
        }
        self.store.create_task(new_task).await
    }

    pub async fn update(&self, id: TaskId, updates: UpdateTask) -> Result<Task> {
        if let (Some(title), Some(description)) = (&updates.title, &updates.description) {
            if title == description {
                return Err(CleoError::invalid_input("title and description must differ"));
            }
        }
        if let Some(Some(parent_id)) = updates.parent_id {
            self.check_parent_reparent(id, parent_id).await?;
        }
        self.store.update_task(id, updates).await
    }

    async fn check_parent(&self, parent_id: TaskId) -> Result<()> {
        let depth = self.parent_chain_depth(parent_id).await?;
        if depth + 1 > MAX_HIERARCHY_DEPTH {
            return Err(CleoError::CircularHierarchy);
        }
        let siblings = self
            .store
            .list_tasks(TaskFilter {
                parent_id: Some(parent_id),
                ..Default::default()
            })
            .await?;
        if siblings.len() >= self.config.max_siblings {
            return Err(CleoError::invalid_input("parent has reached the configured max siblings"));
        }
        Ok(())
    }

    async fn check_parent_reparent(&self, id: TaskId, parent_id: TaskId) -> Result<()> {
        if parent_id == id {
            return Err(CleoError::CircularHierarchy);
        }
        let mut cursor = Some(parent_id);
        while let Some(current) = cursor {
            if current == id {
                return Err(CleoError::CircularHierarchy);
            }
            let task = self
                .store
                .get_task(current)
                .await?
                .ok_or_else(|| CleoError::not_found(format!("task {current}")))?;
            cursor = task.parent_id;
        }
        self.check_parent(parent_id).await
    }

    async fn parent_chain_depth(&self, id: TaskId) -> Result<u32> {
        let mut depth = 0u32;
        let mut cursor = Some(id);
        let mut seen = HashSet::new();
        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(CleoError::CircularHierarchy);
            }
            let task = self
                .store
                .get_task(current)
                .await?
                .ok_or_else(|| CleoError::not_found(format!("task {current}")))?;
            depth += 1;
            if depth > MAX_HIERARCHY_DEPTH {
                return Err(CleoError::CircularHierarchy);
            }
            cursor = task.parent_id;
        }
        Ok(depth)
    }

    /// `complete(T)`: requires every child done, required gates passed,
    /// then walks up to auto-transition an epic parent (§4.2).
    pub async fn complete(&self, id: TaskId) -> Result<Task> {
        let task = self.get_required(id).await?;
        let children = self.children_of(id).await?;
        if children.iter().any(|c| c.status != TaskStatus::Done) {
            return Err(CleoError::validation(vec![cleo_core::error::RuleViolation::new(
                "open-subtasks",
                format!("task {id} has subtasks that are not done"),
            )]));
        }
        if !task.verification.passed(&self.config.required_gates) {
            return Err(CleoError::validation(vec![cleo_core::error::RuleViolation::new(
                "verification-incomplete",
                format!("task {id} has not passed all required gates"),
            )]));
        }
        let completed = self.store.set_task_status(id, TaskStatus::Done).await?;
        if let Some(parent_id) = completed.parent_id {
            self.maybe_promote_epic(parent_id).await?;
        }
        Ok(completed)
    }

    async fn maybe_promote_epic(&self, parent_id: TaskId) -> Result<()> {
        let parent = match self.store.get_task(parent_id).await? {
            Some(p) if p.is_epic() => p,
            _ => return Ok(()),
        };
        let siblings = self.children_of(parent_id).await?;
        let all_done = siblings.iter().all(|s| s.status == TaskStatus::Done);
        let all_verified = !self.config.require_for_parent_auto_complete
            || siblings.iter().all(|s| s.verification.passed(&self.config.required_gates));
        if all_done && all_verified && parent.epic_lifecycle == Some(EpicLifecycle::Active) {
            self.store
                .update_task(
                    parent_id,
                    UpdateTask {
                        epic_lifecycle: Some(Some(EpicLifecycle::Review)),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub async fn cancel(&self, id: TaskId) -> Result<Task> {
        self.store.set_task_status(id, TaskStatus::Cancelled).await
    }

    /// `cancel(T) → uncancel(T)` restores pending and clears `cancelledAt`;
    /// `complete(T) → uncancel(T)` is rejected (round-trip law, §8).
    pub async fn uncancel(&self, id: TaskId) -> Result<Task> {
        let task = self.get_required(id).await?;
        if task.status != TaskStatus::Cancelled {
            return Err(CleoError::invalid_input(format!("task {id} is not cancelled")));
        }
        self.store.set_task_status(id, TaskStatus::Pending).await
    }

    pub async fn delete(&self, id: TaskId) -> Result<()> {
        self.store.delete_task(id).await
    }

    pub async fn archive(&self, id: TaskId, source: ArchiveSource) -> Result<()> {
        self.store.archive_task(id, source).await
    }

    pub async fn find(&self, query: &str) -> Result<Vec<Task>> {
        let needle = query.to_lowercase();
        let all = self.store.list_tasks(TaskFilter::default()).await?;
        Ok(all
            .into_iter()
            .filter(|t| t.title.to_lowercase().contains(&needle) || t.description.to_lowercase().contains(&needle))
            .collect())
    }

    pub async fn show(&self, id: TaskId, include_archive: bool) -> Result<Task> {
        if let Some(task) = self.store.get_task(id).await? {
            return Ok(task);
        }
        if include_archive {
            let archived = self.store.list_archived_tasks().await?;
            if let Some(task) = archived.into_iter().find(|t| t.id == id) {
                return Ok(task);
            }
        }
        Err(CleoError::not_found(format!("task {id}")))
    }

    pub async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.store.list_tasks(filter).await
    }

    /// `startTask(T)`: one transaction sets T active and demotes whatever
    /// was previously active (§4.2 active-task invariant).
    pub async fn start_task(&self, id: TaskId) -> Result<Task> {
        let task = self.get_required(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(CleoError::validation(vec![cleo_core::error::RuleViolation::new(
                "status",
                format!("task {id} is not pending"),
            )]));
        }
        if !self.dependencies_met(&task).await? {
            return Err(CleoError::validation(vec![cleo_core::error::RuleViolation::new(
                "dependencies",
                format!("task {id} has unmet dependencies"),
            )]));
        }
        let currently_active = self
            .store
            .list_tasks(TaskFilter {
                status: Some(vec![TaskStatus::Active]),
                ..Default::default()
            })
            .await?;
        for active in currently_active {
            if active.id != id {
                self.store.set_task_status(active.id, TaskStatus::Pending).await?;
            }
        }
        self.store.set_task_status(id, TaskStatus::Active).await
    }

    pub async fn stop_task(&self) -> Result<Option<Task>> {
        let active = self.current_task().await?;
        if let Some(task) = &active {
            self.store.set_task_status(task.id, TaskStatus::Pending).await?;
        }
        Ok(active)
    }

    pub async fn current_task(&self) -> Result<Option<Task>> {
        let active = self
            .store
            .list_tasks(TaskFilter {
                status: Some(vec![TaskStatus::Active]),
                ..Default::default()
            })
            .await?;
        Ok(active.into_iter().next())
    }

    async fn dependencies_met(&self, task: &Task) -> Result<bool> {
        for dep in &task.depends {
            let dep_task = self
                .store
                .get_task(*dep)
                .await?
                .ok_or_else(|| CleoError::not_found(format!("task {dep}")))?;
            if dep_task.status != TaskStatus::Done {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn get_required(&self, id: TaskId) -> Result<Task> {
        self.store.get_task(id).await?.ok_or_else(|| CleoError::not_found(format!("task {id}")))
    }

    async fn children_of(&self, id: TaskId) -> Result<Vec<Task>> {
        let all = self.store.list_tasks(TaskFilter::default()).await?;
        Ok(all.into_iter().filter(|t| t.parent_id == Some(id)).collect())
    }

    /// Kahn's algorithm with deterministic tie-breaks by ID: wave *n* holds
    /// every task whose `depends` all resolved in waves < n (§4.2).
    pub async fn get_execution_waves(&self, root: Option<TaskId>) -> Result<Vec<Vec<TaskId>>> {
        // Done/cancelled tasks are already resolved; they occupy no wave of
        // their own and drop out of dependents' indegree counts (S1).
        let tasks: Vec<Task> = self.scoped_tasks(root).await?.into_iter().filter(|t| !t.is_terminal()).collect();
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();

        let mut indegree: HashMap<TaskId, usize> = HashMap::new();
        for t in &tasks {
            let count = t.depends.iter().filter(|d| by_id.contains_key(d)).count();
            indegree.insert(t.id, count);
        }

        let mut remaining: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<TaskId> = remaining
                .iter()
                .copied()
                .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
                .collect();
            if ready.is_empty() {
                let cycle = self.detect_cycles_within(&remaining, &by_id);
                return Err(CleoError::validation(vec![cleo_core::error::RuleViolation::new(
                    "cycle",
                    format!("dependency cycle among {:?}", cycle.first().map(|c| &c.0)),
                )]));
            }
            ready.sort();
            for id in &ready {
                remaining.remove(id);
            }
            for t in &tasks {
                if remaining.contains(&t.id) {
                    let unresolved = t.depends.iter().filter(|d| remaining.contains(d)).count();
                    indegree.insert(t.id, unresolved);
                }
            }
            waves.push(ready);
        }
        Ok(waves)
    }

    pub async fn detect_cycles(&self) -> Result<Vec<Cycle>> {
        let tasks = self.store.list_tasks(TaskFilter::default()).await?;
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let remaining: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        Ok(self.detect_cycles_within(&remaining, &by_id))
    }

    fn detect_cycles_within(&self, universe: &HashSet<TaskId>, by_id: &HashMap<TaskId, &Task>) -> Vec<Cycle> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        let mut cycles = Vec::new();
        let mut ids: Vec<TaskId> = universe.iter().copied().collect();
        ids.sort();
        for start in ids {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            self.dfs_cycle(start, by_id, universe, &mut visiting, &mut visited, &mut path, &mut cycles);
        }
        cycles
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_cycle(
        &self,
        id: TaskId,
        by_id: &HashMap<TaskId, &Task>,
        universe: &HashSet<TaskId>,
        visiting: &mut HashSet<TaskId>,
        visited: &mut HashSet<TaskId>,
        path: &mut Vec<TaskId>,
        cycles: &mut Vec<Cycle>,
    ) {
        visiting.insert(id);
        path.push(id);
        if let Some(task) = by_id.get(&id) {
            for dep in &task.depends {
                if !universe.contains(dep) {
                    continue;
                }
                if visiting.contains(dep) {
                    let start = path.iter().position(|p| p == dep).unwrap_or(0);
                    cycles.push(Cycle(path[start..].to_vec()));
                } else if !visited.contains(dep) {
                    self.dfs_cycle(*dep, by_id, universe, visiting, visited, path, cycles);
                }
            }
        }
        path.pop();
        visiting.remove(&id);
        visited.insert(id);
    }

    async fn scoped_tasks(&self, root: Option<TaskId>) -> Result<Vec<Task>> {
        let all = self.store.list_tasks(TaskFilter::default()).await?;
        match root {
            None => Ok(all),
            Some(root_id) => {
                let mut scope = HashSet::new();
                scope.insert(root_id);
                let mut queue = VecDeque::from([root_id]);
                while let Some(next) = queue.pop_front() {
                    for t in &all {
                        if t.parent_id == Some(next) && scope.insert(t.id) {
                            queue.push_back(t.id);
                        }
                    }
                }
                Ok(all.into_iter().filter(|t| scope.contains(&t.id)).collect())
            }
        }
    }

    /// The longest chain of `depends` edges reachable from any task in
    /// scope, by task count.
    pub async fn get_critical_path(&self, root: Option<TaskId>) -> Result<Vec<TaskId>> {
        let tasks = self.scoped_tasks(root).await?;
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let mut memo: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut best: Vec<TaskId> = Vec::new();
        let mut ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        ids.sort();
        for id in ids {
            let path = self.longest_path_from(id, &by_id, &mut memo);
            if path.len() > best.len() {
                best = path;
            }
        }
        Ok(best)
    }

    fn longest_path_from(&self, id: TaskId, by_id: &HashMap<TaskId, &Task>, memo: &mut HashMap<TaskId, Vec<TaskId>>) -> Vec<TaskId> {
        if let Some(cached) = memo.get(&id) {
            return cached.clone();
        }
        let mut best: Vec<TaskId> = Vec::new();
        if let Some(task) = by_id.get(&id) {
            for dep in &task.depends {
                if by_id.contains_key(dep) {
                    let candidate = self.longest_path_from(*dep, by_id, memo);
                    if candidate.len() > best.len() {
                        best = candidate;
                    }
                }
            }
        }
        let mut path = best;
        path.push(id);
        memo.insert(id, path.clone());
        path
    }

    /// Every task transitively blocked if `id` never completes: children
    /// and anything depending (directly or transitively) on `id`.
    pub async fn get_impact(&self, id: TaskId) -> Result<Vec<TaskId>> {
        let all = self.store.list_tasks(TaskFilter::default()).await?;
        let mut impacted = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            for t in &all {
                let depends_on_it = t.depends.contains(&next);
                let child_of_it = t.parent_id == Some(next);
                if (depends_on_it || child_of_it) && impacted.insert(t.id) {
                    queue.push_back(t.id);
                }
            }
        }
        let mut result: Vec<TaskId> = impacted.into_iter().collect();
        result.sort();
        Ok(result)
    }

    pub async fn get_task_tree(&self, id: TaskId) -> Result<Vec<Task>> {
        let all = self.store.list_tasks(TaskFilter::default()).await?;
        let mut tree = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            for t in &all {
                if t.parent_id == Some(next) {
                    queue.push_back(t.id);
                    tree.push(t.clone());
                }
            }
        }
        Ok(tree)
    }

    pub async fn get_task_deps(&self, id: TaskId) -> Result<Vec<Task>> {
        let task = self.get_required(id).await?;
        let mut result = Vec::with_capacity(task.depends.len());
        for dep in &task.depends {
            if let Some(t) = self.store.get_task(*dep).await? {
                result.push(t);
            }
        }
        Ok(result)
    }

    /// Sets a gate, preventing self-approval (§4.2) and cascading the
    /// downstream reset when a gate fails (invariant 12).
    pub async fn gate_set(&self, id: TaskId, gate: GateName, value: bool, agent: &str) -> Result<Task> {
        let whitelist = self.store.agent_whitelist().await?;
        if !whitelist.is_empty() && !whitelist.iter().any(|w| w == agent) {
            return Err(CleoError::AgentNotWhitelisted(agent.to_string()));
        }
        let task = self.get_required(id).await?;
        if task.created_by.as_deref() == Some(agent) {
            return Err(CleoError::CircularValidation);
        }
        let mut verification = task.verification.clone();
        verification.gates.insert(gate, Some(value));
        verification.last_agent = Some(agent.to_string());
        verification.last_updated = Some(Utc::now());
        if !value {
            verification.reset_downstream_of(gate);
            verification.failure_log.push(FailureLogEntry {
                gate,
                agent: agent.to_string(),
                round: verification.round,
                at: Utc::now(),
                note: None,
            });
        }
        let is_last_gate = GATE_ORDER.last() == Some(&gate);
        if value && is_last_gate && verification.passed(&self.config.required_gates) {
            verification.round = (verification.round + 1).min(self.config.max_rounds);
        }
        self.store.update_verification(id, verification).await
    }
}
