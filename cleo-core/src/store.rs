//! The Store trait: the one accessor surface through which every engine
//! reads and writes durable state (§4.1). A single implementation backs
//! every table; the trait is split into per-domain sections purely for
//! readability, mirroring the way the grounding repository's
//! `TaskRepository` groups task, message, and work-session operations on
//! one trait rather than scattering them across many small traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

/// Opaque transaction handle. The concrete store implementation downcasts
/// this to its own connection/transaction type; callers only thread it
/// through so multi-step mutations (§4.1, §4.3's "all of (a)-(d) run in
/// one transaction") commit atomically.
pub trait StoreTransaction: Send {}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub status: Option<DecisionStatus>,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_tasks: u64,
    pub tasks_by_status: std::collections::HashMap<String, u64>,
    pub schema_version: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- lifecycle / schema ---
    async fn migrate(&self) -> Result<()>;
    async fn health_check(&self) -> Result<()>;
    async fn schema_version(&self) -> Result<i64>;

    // --- task graph (§4.2) ---
    async fn next_task_id(&self) -> Result<TaskId>;
    async fn create_task(&self, new_task: NewTask) -> Result<Task>;
    async fn update_task(&self, id: TaskId, updates: UpdateTask) -> Result<Task>;
    async fn set_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>>;
    async fn delete_task(&self, id: TaskId) -> Result<()>;
    async fn archive_task(&self, id: TaskId, source: ArchiveSource) -> Result<()>;
    async fn list_archived_tasks(&self) -> Result<Vec<Task>>;
    async fn update_verification(&self, id: TaskId, verification: Verification) -> Result<Task>;
    async fn stored_checksum(&self) -> Result<String>;
    async fn recompute_and_store_checksum(&self) -> Result<String>;
    async fn sequence(&self) -> Result<SequenceRecord>;

    // --- sessions (§4.4) ---
    async fn create_session(&self, session: Session) -> Result<Session>;
    async fn update_session(&self, session: Session) -> Result<Session>;
    async fn get_session(&self, id: i64) -> Result<Option<Session>>;
    async fn get_active_session(&self) -> Result<Option<Session>>;
    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>>;
    async fn last_ended_session_with_scope(&self, scope: &SessionScope) -> Result<Option<Session>>;

    // --- lifecycle pipeline (§4.3) ---
    async fn get_or_create_pipeline(&self, epic_id: TaskId) -> Result<LifecyclePipeline>;
    async fn get_pipeline(&self, epic_id: TaskId) -> Result<Option<LifecyclePipeline>>;
    async fn update_pipeline_status(&self, pipeline_id: i64, status: PipelineStatus) -> Result<()>;
    async fn get_stage(&self, pipeline_id: i64, stage: StageName) -> Result<Option<LifecycleStage>>;
    async fn list_stages(&self, pipeline_id: i64) -> Result<Vec<LifecycleStage>>;
    async fn upsert_stage(&self, stage: LifecycleStage) -> Result<LifecycleStage>;
    async fn append_transition(&self, transition: LifecycleTransition) -> Result<LifecycleTransition>;
    async fn append_gate_result(&self, result: LifecycleGateResult) -> Result<LifecycleGateResult>;
    async fn append_evidence(&self, evidence: LifecycleEvidence) -> Result<LifecycleEvidence>;

    // --- decisions (ADR) ---
    async fn create_decision(&self, decision: Decision) -> Result<Decision>;
    async fn get_decision(&self, id: i64) -> Result<Option<Decision>>;
    async fn update_decision(&self, decision: Decision) -> Result<Decision>;
    async fn list_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>>;
    async fn append_decision_evidence(&self, evidence: DecisionEvidence) -> Result<DecisionEvidence>;
    async fn link_task_decision(&self, link: TaskDecision) -> Result<()>;
    async fn task_decisions_for(&self, decision_id: i64) -> Result<Vec<TaskDecision>>;
    async fn flag_needs_review(&self, task_id: TaskId, decision_id: i64) -> Result<()>;

    // --- document manifest ---
    async fn append_manifest_entry(&self, entry: DocumentManifestEntry) -> Result<DocumentManifestEntry>;
    async fn list_manifest(&self) -> Result<Vec<DocumentManifestEntry>>;

    // --- observability ---
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<AuditLogEntry>;
    /// Flips a previously-written audit row to its final outcome (§4.5). The
    /// dispatcher writes the row as `Failure` before a mutation runs, then
    /// promotes it to `Success` only once the mutation actually commits, so
    /// a write that never reaches this call stays recorded as failed.
    async fn update_audit_outcome(&self, id: i64, outcome: AuditOutcome) -> Result<()>;
    async fn list_audit_for_session(&self, session_id: i64) -> Result<Vec<AuditLogEntry>>;
    async fn append_compliance(&self, record: ComplianceRecord) -> Result<ComplianceRecord>;
    async fn append_token_usage(&self, event: TokenUsageEvent) -> Result<TokenUsageEvent>;
    async fn token_usage_total(&self, session_id: Option<i64>) -> Result<u64>;
    async fn start_work_session(&self, task_id: TaskId, agent_name: &str) -> Result<WorkSession>;
    async fn end_work_session(&self, id: i64, notes: Option<String>, productivity_score: Option<f64>) -> Result<WorkSession>;

    // --- agents ---
    async fn list_agents(&self) -> Result<Vec<AgentProfile>>;
    async fn agent_whitelist(&self) -> Result<Vec<String>>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSource {
    Retention,
    PhaseTrigger,
    Manual,
}

impl std::fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArchiveSource::Retention => "retention",
            ArchiveSource::PhaseTrigger => "phase-trigger",
            ArchiveSource::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Read-only view of the task graph, used by engines that must read tasks
/// without depending on the full mutating `Store` surface — breaks the
/// lifecycle/session/orchestration engine cycle described in §9.
#[async_trait]
pub trait TaskGraphView: Send + Sync {
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>>;
    async fn children_of(&self, id: TaskId) -> Result<Vec<Task>>;
}

#[async_trait]
impl<S: Store + ?Sized> TaskGraphView for S {
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Store::get_task(self, id).await
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        Store::list_tasks(self, filter).await
    }

    async fn children_of(&self, id: TaskId) -> Result<Vec<Task>> {
        let all = Store::list_tasks(self, TaskFilter::default()).await?;
        Ok(all.into_iter().filter(|t| t.parent_id == Some(id)).collect())
    }
}

/// Read-only view of decisions, used by the lifecycle engine's gate
/// functions without granting write access.
#[async_trait]
pub trait DecisionView: Send + Sync {
    async fn get_decision(&self, id: i64) -> Result<Option<Decision>>;
    async fn list_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>>;
}

#[async_trait]
impl<S: Store + ?Sized> DecisionView for S {
    async fn get_decision(&self, id: i64) -> Result<Option<Decision>> {
        Store::get_decision(self, id).await
    }

    async fn list_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>> {
        Store::list_decisions(self, filter).await
    }
}
