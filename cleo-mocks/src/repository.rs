//! In-memory `Store` implementation for testing.
//!
//! Thread-safe, with error injection and call-history tracking so engine
//! tests can assert on interaction patterns without a real database.

use async_trait::async_trait;
use chrono::Utc;
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use cleo_core::store::{ArchiveSource, DecisionFilter, SessionFilter, Store, StoreStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    archived: HashMap<TaskId, Task>,
    sessions: HashMap<i64, Session>,
    pipelines: HashMap<TaskId, LifecyclePipeline>,
    stages: HashMap<i64, LifecycleStage>,
    decisions: HashMap<i64, Decision>,
    manifest: Vec<DocumentManifestEntry>,
    audit: Vec<AuditLogEntry>,
    compliance: Vec<ComplianceRecord>,
    token_usage: Vec<TokenUsageEvent>,
    work_sessions: HashMap<i64, WorkSession>,
    task_decisions: Vec<TaskDecision>,
    agents: Vec<AgentProfile>,
    checksum: String,
}

/// In-memory `Store` for engine and dispatch tests.
pub struct MockStore {
    state: Arc<Mutex<State>>,
    next_task_id: Arc<AtomicI64>,
    next_session_id: Arc<AtomicI64>,
    next_pipeline_id: Arc<AtomicI64>,
    next_stage_id: Arc<AtomicI64>,
    next_decision_id: Arc<AtomicI64>,
    error_injection: Arc<Mutex<Option<CleoError>>>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            next_task_id: Arc::new(AtomicI64::new(1)),
            next_session_id: Arc::new(AtomicI64::new(1)),
            next_pipeline_id: Arc::new(AtomicI64::new(1)),
            next_stage_id: Arc::new(AtomicI64::new(1)),
            next_decision_id: Arc::new(AtomicI64::new(1)),
            error_injection: Arc::new(Mutex::new(None)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::new();
        let max_id = tasks.iter().map(|t| t.id.0).max().unwrap_or(0);
        store.next_task_id.store(max_id as i64 + 1, Ordering::SeqCst);
        let mut state = store.state.lock();
        for t in tasks {
            state.tasks.insert(t.id, t);
        }
        drop(state);
        store
    }

    pub fn with_agents(self, agents: Vec<AgentProfile>) -> Self {
        self.state.lock().agents = agents;
        self
    }

    pub fn inject_error(&self, error: CleoError) {
        *self.error_injection.lock() = Some(error);
    }

    pub fn clear_error(&self) {
        *self.error_injection.lock() = None;
    }

    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call == method),
            "method '{method}' was not called. call history: {history:?}"
        );
    }

    fn record(&self, method: &str) {
        self.call_history.lock().push(method.to_string());
    }

    fn check_error_injection(&self) -> Result<()> {
        if let Some(err) = self.error_injection.lock().take() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MockStore {
    async fn migrate(&self) -> Result<()> {
        self.record("migrate");
        self.check_error_injection()
    }

    async fn health_check(&self) -> Result<()> {
        self.record("health_check");
        self.check_error_injection()
    }

    async fn schema_version(&self) -> Result<i64> {
        self.record("schema_version");
        self.check_error_injection()?;
        Ok(1)
    }

    async fn next_task_id(&self) -> Result<TaskId> {
        self.record("next_task_id");
        self.check_error_injection()?;
        Ok(TaskId::new(self.next_task_id.fetch_add(1, Ordering::SeqCst) as u64))
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        self.record("create_task");
        self.check_error_injection()?;
        let id = TaskId::new(self.next_task_id.fetch_add(1, Ordering::SeqCst) as u64);
        let now = Utc::now();
        let task = Task {
            id,
            title: new_task.title,
            description: new_task.description,
            status: TaskStatus::Pending,
            priority: new_task.priority.unwrap_or(TaskPriority::Medium),
            task_type: new_task.task_type.unwrap_or(TaskType::Task),
            phase: new_task.phase,
            parent_id: new_task.parent_id,
            depends: new_task.depends,
            labels: new_task.labels,
            notes: Vec::new(),
            files: Vec::new(),
            acceptance: new_task.acceptance,
            size: new_task.size,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            blocked_by: None,
            verification: Verification::default(),
            epic_lifecycle: if new_task.task_type == Some(TaskType::Epic) {
                Some(EpicLifecycle::Active)
            } else {
                None
            },
            created_by: new_task.created_by,
        };
        let mut state = self.state.lock();
        state.tasks.insert(id, task.clone());
        recompute_checksum_locked(&mut state);
        Ok(task)
    }

    async fn update_task(&self, id: TaskId, updates: UpdateTask) -> Result<Task> {
        self.record("update_task");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        if let Some(title) = updates.title {
            task.title = title;
        }
        if let Some(description) = updates.description {
            task.description = description;
        }
        if let Some(priority) = updates.priority {
            task.priority = priority;
        }
        if let Some(phase) = updates.phase {
            task.phase = phase;
        }
        if let Some(parent_id) = updates.parent_id {
            task.parent_id = parent_id;
        }
        if let Some(depends) = updates.depends {
            task.depends = depends;
        }
        if let Some(labels) = updates.labels {
            task.labels = labels;
        }
        if let Some(notes) = updates.notes {
            task.notes = notes;
        }
        if let Some(files) = updates.files {
            task.files = files;
        }
        if let Some(acceptance) = updates.acceptance {
            task.acceptance = acceptance;
        }
        if let Some(size) = updates.size {
            task.size = size;
        }
        if let Some(blocked_by) = updates.blocked_by {
            task.blocked_by = blocked_by;
        }
        if let Some(epic_lifecycle) = updates.epic_lifecycle {
            task.epic_lifecycle = epic_lifecycle;
        }
        task.updated_at = Utc::now();
        let result = task.clone();
        recompute_checksum_locked(&mut state);
        Ok(result)
    }

    async fn set_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task> {
        self.record("set_task_status");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        task.status = status;
        task.updated_at = Utc::now();
        match status {
            TaskStatus::Done => task.completed_at = Some(task.updated_at),
            TaskStatus::Cancelled => task.cancelled_at = Some(task.updated_at),
            _ => {}
        }
        let result = task.clone();
        recompute_checksum_locked(&mut state);
        Ok(result)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.record("get_task");
        self.check_error_injection()?;
        Ok(self.state.lock().tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.record("list_tasks");
        self.check_error_injection()?;
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.status.as_ref().map_or(true, |s| s.contains(&t.status)))
            .filter(|t| filter.priority.as_ref().map_or(true, |p| p.contains(&t.priority)))
            .filter(|t| filter.task_type.as_ref().map_or(true, |ty| ty.contains(&t.task_type)))
            .filter(|t| filter.phase.as_ref().map_or(true, |p| t.phase.as_deref() == Some(p.as_str())))
            .filter(|t| filter.parent_id.map_or(true, |p| t.parent_id == Some(p)))
            .filter(|t| filter.label.as_ref().map_or(true, |l| t.labels.contains(l)))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.record("delete_task");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        if state.tasks.values().any(|t| t.parent_id == Some(id)) {
            return Err(CleoError::HasChildren(id.to_string()));
        }
        state.tasks.remove(&id);
        recompute_checksum_locked(&mut state);
        Ok(())
    }

    async fn archive_task(&self, id: TaskId, _source: ArchiveSource) -> Result<()> {
        self.record("archive_task");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let task = state
            .tasks
            .remove(&id)
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        state.archived.insert(id, task);
        recompute_checksum_locked(&mut state);
        Ok(())
    }

    async fn list_archived_tasks(&self) -> Result<Vec<Task>> {
        self.record("list_archived_tasks");
        self.check_error_injection()?;
        Ok(self.state.lock().archived.values().cloned().collect())
    }

    async fn update_verification(&self, id: TaskId, verification: Verification) -> Result<Task> {
        self.record("update_verification");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        task.verification = verification;
        task.updated_at = Utc::now();
        let result = task.clone();
        recompute_checksum_locked(&mut state);
        Ok(result)
    }

    async fn stored_checksum(&self) -> Result<String> {
        self.record("stored_checksum");
        self.check_error_injection()?;
        Ok(self.state.lock().checksum.clone())
    }

    async fn recompute_and_store_checksum(&self) -> Result<String> {
        self.record("recompute_and_store_checksum");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        recompute_checksum_locked(&mut state);
        Ok(state.checksum.clone())
    }

    async fn sequence(&self) -> Result<SequenceRecord> {
        self.record("sequence");
        self.check_error_injection()?;
        let counter = self.next_task_id.load(Ordering::SeqCst) as u64 - 1;
        Ok(SequenceRecord {
            counter,
            last_id: if counter == 0 { None } else { Some(TaskId::new(counter)) },
            checksum: self.state.lock().checksum.clone(),
        })
    }

    async fn create_session(&self, mut session: Session) -> Result<Session> {
        self.record("create_session");
        self.check_error_injection()?;
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        session.id = id;
        self.state.lock().sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn update_session(&self, session: Session) -> Result<Session> {
        self.record("update_session");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&session.id) {
            return Err(CleoError::SessionNotFound(session.id));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: i64) -> Result<Option<Session>> {
        self.record("get_session");
        self.check_error_injection()?;
        Ok(self.state.lock().sessions.get(&id).cloned())
    }

    async fn get_active_session(&self) -> Result<Option<Session>> {
        self.record("get_active_session");
        self.check_error_injection()?;
        Ok(self
            .state
            .lock()
            .sessions
            .values()
            .find(|s| s.status == SessionStatus::Active)
            .cloned())
    }

    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>> {
        self.record("list_sessions");
        self.check_error_injection()?;
        let mut sessions: Vec<Session> = self
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));
        Ok(sessions)
    }

    async fn last_ended_session_with_scope(&self, scope: &SessionScope) -> Result<Option<Session>> {
        self.record("last_ended_session_with_scope");
        self.check_error_injection()?;
        let mut matches: Vec<Session> = self
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| matches!(s.status, SessionStatus::Ended | SessionStatus::Archived))
            .filter(|s| s.scope.scope_type == scope.scope_type && s.scope.root_task_id == scope.root_task_id)
            .cloned()
            .collect();
        matches.sort_by_key(|s| s.ended_at);
        Ok(matches.pop())
    }

    async fn get_or_create_pipeline(&self, epic_id: TaskId) -> Result<LifecyclePipeline> {
        self.record("get_or_create_pipeline");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        if let Some(p) = state.pipelines.get(&epic_id) {
            return Ok(p.clone());
        }
        let pipeline = LifecyclePipeline {
            id: self.next_pipeline_id.fetch_add(1, Ordering::SeqCst),
            epic_id,
            status: PipelineStatus::Active,
            current_stage_id: None,
        };
        state.pipelines.insert(epic_id, pipeline.clone());
        Ok(pipeline)
    }

    async fn get_pipeline(&self, epic_id: TaskId) -> Result<Option<LifecyclePipeline>> {
        self.record("get_pipeline");
        self.check_error_injection()?;
        Ok(self.state.lock().pipelines.get(&epic_id).cloned())
    }

    async fn update_pipeline_status(&self, pipeline_id: i64, status: PipelineStatus) -> Result<()> {
        self.record("update_pipeline_status");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        if let Some(p) = state.pipelines.values_mut().find(|p| p.id == pipeline_id) {
            p.status = status;
        }
        Ok(())
    }

    async fn get_stage(&self, pipeline_id: i64, stage: StageName) -> Result<Option<LifecycleStage>> {
        self.record("get_stage");
        self.check_error_injection()?;
        Ok(self
            .state
            .lock()
            .stages
            .values()
            .find(|s| s.pipeline_id == pipeline_id && s.stage_name == stage)
            .cloned())
    }

    async fn list_stages(&self, pipeline_id: i64) -> Result<Vec<LifecycleStage>> {
        self.record("list_stages");
        self.check_error_injection()?;
        let mut stages: Vec<LifecycleStage> = self
            .state
            .lock()
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.stage_name.index());
        Ok(stages)
    }

    async fn upsert_stage(&self, mut stage: LifecycleStage) -> Result<LifecycleStage> {
        self.record("upsert_stage");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let existing_id = state
            .stages
            .values()
            .find(|s| s.pipeline_id == stage.pipeline_id && s.stage_name == stage.stage_name)
            .map(|s| s.id);
        let id = existing_id.unwrap_or_else(|| self.next_stage_id.fetch_add(1, Ordering::SeqCst));
        stage.id = id;
        state.stages.insert(id, stage.clone());
        Ok(stage)
    }

    async fn append_transition(&self, transition: LifecycleTransition) -> Result<LifecycleTransition> {
        self.record("append_transition");
        self.check_error_injection()?;
        Ok(transition)
    }

    async fn append_gate_result(&self, result: LifecycleGateResult) -> Result<LifecycleGateResult> {
        self.record("append_gate_result");
        self.check_error_injection()?;
        Ok(result)
    }

    async fn append_evidence(&self, evidence: LifecycleEvidence) -> Result<LifecycleEvidence> {
        self.record("append_evidence");
        self.check_error_injection()?;
        Ok(evidence)
    }

    async fn create_decision(&self, mut decision: Decision) -> Result<Decision> {
        self.record("create_decision");
        self.check_error_injection()?;
        let id = self.next_decision_id.fetch_add(1, Ordering::SeqCst);
        decision.id = id;
        self.state.lock().decisions.insert(id, decision.clone());
        Ok(decision)
    }

    async fn get_decision(&self, id: i64) -> Result<Option<Decision>> {
        self.record("get_decision");
        self.check_error_injection()?;
        Ok(self.state.lock().decisions.get(&id).cloned())
    }

    async fn update_decision(&self, decision: Decision) -> Result<Decision> {
        self.record("update_decision");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        if !state.decisions.contains_key(&decision.id) {
            return Err(CleoError::not_found(format!("decision {}", decision.id)));
        }
        state.decisions.insert(decision.id, decision.clone());
        Ok(decision)
    }

    async fn list_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>> {
        self.record("list_decisions");
        self.check_error_injection()?;
        Ok(self
            .state
            .lock()
            .decisions
            .values()
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .cloned()
            .collect())
    }

    async fn append_decision_evidence(&self, evidence: DecisionEvidence) -> Result<DecisionEvidence> {
        self.record("append_decision_evidence");
        self.check_error_injection()?;
        Ok(evidence)
    }

    async fn link_task_decision(&self, link: TaskDecision) -> Result<()> {
        self.record("link_task_decision");
        self.check_error_injection()?;
        self.state.lock().task_decisions.push(link);
        Ok(())
    }

    async fn task_decisions_for(&self, decision_id: i64) -> Result<Vec<TaskDecision>> {
        self.record("task_decisions_for");
        self.check_error_injection()?;
        Ok(self
            .state
            .lock()
            .task_decisions
            .iter()
            .filter(|l| l.decision_id == decision_id)
            .cloned()
            .collect())
    }

    async fn flag_needs_review(&self, task_id: TaskId, decision_id: i64) -> Result<()> {
        self.record("flag_needs_review");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        for link in state.task_decisions.iter_mut() {
            if link.task_id == task_id && link.decision_id == decision_id {
                link.needs_review = true;
            }
        }
        Ok(())
    }

    async fn append_manifest_entry(&self, mut entry: DocumentManifestEntry) -> Result<DocumentManifestEntry> {
        self.record("append_manifest_entry");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        entry.id = state.manifest.len() as i64 + 1;
        state.manifest.push(entry.clone());
        Ok(entry)
    }

    async fn list_manifest(&self) -> Result<Vec<DocumentManifestEntry>> {
        self.record("list_manifest");
        self.check_error_injection()?;
        Ok(self.state.lock().manifest.clone())
    }

    async fn append_audit(&self, mut entry: AuditLogEntry) -> Result<AuditLogEntry> {
        self.record("append_audit");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        entry.id = state.audit.len() as i64 + 1;
        state.audit.push(entry.clone());
        Ok(entry)
    }

    async fn update_audit_outcome(&self, id: i64, outcome: AuditOutcome) -> Result<()> {
        self.record("update_audit_outcome");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        if let Some(entry) = state.audit.iter_mut().find(|a| a.id == id) {
            entry.outcome = outcome;
        }
        Ok(())
    }

    async fn list_audit_for_session(&self, session_id: i64) -> Result<Vec<AuditLogEntry>> {
        self.record("list_audit_for_session");
        self.check_error_injection()?;
        Ok(self
            .state
            .lock()
            .audit
            .iter()
            .filter(|a| a.session_id == Some(session_id))
            .cloned()
            .collect())
    }

    async fn append_compliance(&self, mut record: ComplianceRecord) -> Result<ComplianceRecord> {
        self.record("append_compliance");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        record.id = state.compliance.len() as i64 + 1;
        state.compliance.push(record.clone());
        Ok(record)
    }

    async fn append_token_usage(&self, mut event: TokenUsageEvent) -> Result<TokenUsageEvent> {
        self.record("append_token_usage");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        event.id = state.token_usage.len() as i64 + 1;
        state.token_usage.push(event.clone());
        Ok(event)
    }

    async fn token_usage_total(&self, session_id: Option<i64>) -> Result<u64> {
        self.record("token_usage_total");
        self.check_error_injection()?;
        Ok(self
            .state
            .lock()
            .token_usage
            .iter()
            .filter(|e| session_id.map_or(true, |sid| e.session_id == Some(sid)))
            .map(|e| e.tokens)
            .sum())
    }

    async fn start_work_session(&self, task_id: TaskId, agent_name: &str) -> Result<WorkSession> {
        self.record("start_work_session");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let id = state.work_sessions.len() as i64 + 1;
        let ws = WorkSession {
            id,
            task_id,
            agent_name: agent_name.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            notes: None,
            productivity_score: None,
        };
        state.work_sessions.insert(id, ws.clone());
        Ok(ws)
    }

    async fn end_work_session(&self, id: i64, notes: Option<String>, productivity_score: Option<f64>) -> Result<WorkSession> {
        self.record("end_work_session");
        self.check_error_injection()?;
        let mut state = self.state.lock();
        let ws = state
            .work_sessions
            .get_mut(&id)
            .ok_or_else(|| CleoError::not_found(format!("work session {id}")))?;
        ws.ended_at = Some(Utc::now());
        ws.notes = notes;
        ws.productivity_score = productivity_score;
        Ok(ws.clone())
    }

    async fn list_agents(&self) -> Result<Vec<AgentProfile>> {
        self.record("list_agents");
        self.check_error_injection()?;
        Ok(self.state.lock().agents.clone())
    }

    async fn agent_whitelist(&self) -> Result<Vec<String>> {
        self.record("agent_whitelist");
        self.check_error_injection()?;
        Ok(self.state.lock().agents.iter().map(|a| a.name.clone()).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.record("stats");
        self.check_error_injection()?;
        let state = self.state.lock();
        let mut tasks_by_status = HashMap::new();
        for t in state.tasks.values() {
            *tasks_by_status.entry(t.status.to_string()).or_insert(0u64) += 1;
        }
        Ok(StoreStats {
            total_tasks: state.tasks.len() as u64,
            tasks_by_status,
            schema_version: 1,
        })
    }
}

fn recompute_checksum_locked(state: &mut State) {
    let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
    tasks.sort_by_key(|t| t.id);
    state.checksum = cleo_core::validation::compute_checksum(&tasks);
}
