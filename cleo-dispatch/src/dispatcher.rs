//! `CleoDispatcher`: the concrete `Dispatcher` implementation. Assembles
//! the five engines behind one `Arc<S>`, serializes mutations behind a
//! single advisory lock (§5), and wraps every call in audit middleware
//! (§4.5).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cleo_core::dispatch::{DispatchContext, DispatchKind, DispatchResult, Dispatcher, Operation};
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use cleo_core::store::Store;
use sha2::{Digest, Sha256};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use cleo_engine::{ComplianceEngine, GraphConfig, LifecycleEngine, OrchestrationEngine, SessionEngine, TaskGraphEngine};

use crate::wire;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(7);

enum LockGuard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

pub struct CleoDispatcher<S: Store> {
    store: Arc<S>,
    lock: Arc<RwLock<()>>,
    lock_timeout: Duration,
    graph: TaskGraphEngine<S>,
    lifecycle: LifecycleEngine<S>,
    session: SessionEngine<S>,
    orchestration: OrchestrationEngine<S>,
    compliance: ComplianceEngine<S>,
}

impl<S: Store + 'static> CleoDispatcher<S> {
    pub fn new(store: Arc<S>, graph_config: GraphConfig, artifact_root: PathBuf, enforcement: GateEnforcement) -> Self {
        Self {
            graph: TaskGraphEngine::new(store.clone(), graph_config),
            lifecycle: LifecycleEngine::new(store.clone(), artifact_root, enforcement),
            session: SessionEngine::new(store.clone()),
            orchestration: OrchestrationEngine::new(store.clone()),
            compliance: ComplianceEngine::new(store.clone()),
            lock: Arc::new(RwLock::new(())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            store,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Parses a wire-level call into an [`Operation`] before dispatching it
    /// — the validation step the registration paragraph in §4.5 requires.
    pub async fn dispatch_wire(&self, full_operation: &str, params: serde_json::Value, ctx: DispatchContext) -> DispatchResult {
        match wire::parse(full_operation, params) {
            Ok(op) => self.dispatch(op, ctx).await,
            Err(err) => DispatchResult::err(&err),
        }
    }

    async fn acquire(&self, kind: DispatchKind) -> Result<LockGuard> {
        match kind {
            DispatchKind::Mutate => tokio::time::timeout(self.lock_timeout, self.lock.clone().write_owned())
                .await
                .map(LockGuard::Write)
                .map_err(|_| CleoError::LockTimeout),
            DispatchKind::Query => tokio::time::timeout(self.lock_timeout, self.lock.clone().read_owned())
                .await
                .map(LockGuard::Read)
                .map_err(|_| CleoError::LockTimeout),
        }
    }

    fn build_audit_entry(&self, op: &Operation, ctx: &DispatchContext, outcome: AuditOutcome) -> AuditLogEntry {
        let mut hasher = Sha256::new();
        hasher.update(format!("{op:?}").as_bytes());
        let params_digest = format!("{:x}", hasher.finalize());

        AuditLogEntry {
            id: 0,
            created_at: Utc::now(),
            operation: op.as_dotted().to_string(),
            entity_type: op.as_dotted().split('.').next().unwrap_or("unknown").to_string(),
            entity_id: entity_id(op),
            session_id: ctx.session_id,
            agent_id: ctx.agent_id.clone(),
            params_digest,
            outcome,
        }
    }

    /// Grade-mode audit trail for query operations (§4.4): queries have no
    /// state of their own to protect, so there's nothing for the write to
    /// gate — a failure here is logged and swallowed rather than turning a
    /// successful read into an error.
    async fn audit_query(&self, op: &Operation, ctx: &DispatchContext, outcome: AuditOutcome) {
        let entry = self.build_audit_entry(op, ctx, outcome);
        if let Err(err) = self.store.append_audit(entry).await {
            tracing::warn!(error = %err, "failed to append audit log entry");
        }
    }

    /// Keeps `activeSession.taskWork` in step with the task graph's single
    /// active task (S2): the graph and session engines never reference each
    /// other directly, so this seam lives here instead (§9 "cyclic
    /// references between engines").
    async fn sync_active_task_work(&self, task_id: Option<TaskId>) -> Result<()> {
        if let Some(mut session) = self.store.get_active_session().await? {
            session.task_work = task_id.map(|id| TaskWorkRef { task_id: id });
            self.store.update_session(session).await?;
        }
        Ok(())
    }

    /// Runs the universal invariant suite (§4.6, §8) scoped to one task:
    /// every rule still sees the whole graph (cycle and hierarchy checks
    /// need it), but only violations that name this task are reported.
    async fn validate_task(&self, id: TaskId) -> Result<serde_json::Value> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;

        let active = self.store.list_tasks(Default::default()).await?;
        let archived = self.store.list_archived_tasks().await?;
        let stored_checksum = self.store.stored_checksum().await?;
        let view = cleo_core::validation::TaskSetView {
            active: &active,
            archived: &archived,
            stored_checksum: &stored_checksum,
        };

        let id_tag = id.to_string();
        let violations: Vec<_> = cleo_core::validation::check_invariants(&view)
            .into_iter()
            .filter(|v| v.message.contains(&id_tag))
            .collect();

        Ok(serde_json::json!({
            "task_id": id_tag,
            "ready": violations.is_empty(),
            "violations": violations,
        }))
    }

    async fn route(&self, op: Operation, ctx: &DispatchContext) -> Result<serde_json::Value> {
        if ctx.cancellation.is_cancelled() {
            return Err(CleoError::Cancelled);
        }
        use Operation::*;
        let value = match op {
            TasksAdd(new_task) => serde_json::to_value(self.graph.add(new_task).await?),
            TasksUpdate { id, updates } => serde_json::to_value(self.graph.update(id, updates).await?),
            TasksComplete { id } => serde_json::to_value(self.graph.complete(id).await?),
            TasksCancel { id } => serde_json::to_value(self.graph.cancel(id).await?),
            TasksUncancel { id } => serde_json::to_value(self.graph.uncancel(id).await?),
            TasksDelete { id } => {
                self.graph.delete(id).await?;
                serde_json::to_value(())
            }
            TasksArchive { id } => {
                self.graph.archive(id, cleo_core::store::ArchiveSource::Manual).await?;
                serde_json::to_value(())
            }
            TasksFind { query } => serde_json::to_value(self.graph.find(&query).await?),
            TasksShow { id, include_archive } => serde_json::to_value(self.graph.show(id, include_archive).await?),
            TasksList(filter) => serde_json::to_value(self.graph.list(filter).await?),
            TasksStart { id } => {
                let task = self.graph.start_task(id).await?;
                self.sync_active_task_work(Some(task.id)).await?;
                serde_json::to_value(task)
            }
            TasksStop => {
                let stopped = self.graph.stop_task().await?;
                self.sync_active_task_work(None).await?;
                serde_json::to_value(stopped)
            }
            TasksCurrent => serde_json::to_value(self.graph.current_task().await?),
            TasksFocusSet { id } => {
                let task = self.graph.start_task(id).await?;
                self.sync_active_task_work(Some(task.id)).await?;
                serde_json::to_value(task)
            }
            TasksFocusClear => {
                let stopped = self.graph.stop_task().await?;
                self.sync_active_task_work(None).await?;
                serde_json::to_value(stopped)
            }
            TasksFocusShow => serde_json::to_value(self.graph.current_task().await?),
            TasksGateSet { id, gate, value, agent } => serde_json::to_value(self.graph.gate_set(id, gate, value, &agent).await?),
            TasksGetExecutionWaves { root } => serde_json::to_value(self.graph.get_execution_waves(root).await?),
            TasksGetCriticalPath { root } => serde_json::to_value(self.graph.get_critical_path(root).await?),
            TasksGetImpact { id } => serde_json::to_value(self.graph.get_impact(id).await?),
            TasksDetectCycles => serde_json::to_value(self.graph.detect_cycles().await?.into_iter().map(|c| c.0).collect::<Vec<_>>()),
            TasksGetTaskTree { id } => serde_json::to_value(self.graph.get_task_tree(id).await?),
            TasksGetTaskDeps { id } => serde_json::to_value(self.graph.get_task_deps(id).await?),

            SessionStart { scope, agent_identifier, grade_mode } => {
                let session = self.session.start(&scope, agent_identifier, grade_mode).await?;
                let previous_debrief = match session.previous_session_id {
                    Some(prev_id) => self.store.get_session(prev_id).await?.and_then(|p| p.debrief_json),
                    None => None,
                };
                serde_json::to_value(serde_json::json!({ "session": session, "previous_debrief": previous_debrief }))
            }
            SessionEnd => serde_json::to_value(self.session.end().await?),
            SessionSuspend => serde_json::to_value(self.session.suspend().await?),
            SessionResume { id } => serde_json::to_value(self.session.resume(id).await?),
            SessionStatus => serde_json::to_value(self.session.status().await?),
            SessionList => serde_json::to_value(self.session.list(None).await?),
            SessionShow { id } => serde_json::to_value(self.session.show(id).await?),
            SessionBriefing => serde_json::to_value(self.session.briefing().await?),
            SessionHandoff => {
                let active = self.session.status().await?.ok_or_else(|| CleoError::not_found("no active session"))?;
                serde_json::to_value(active.handoff_json)
            }
            SessionDebriefCompute => {
                let active = self.session.status().await?.ok_or_else(|| CleoError::not_found("no active session"))?;
                serde_json::to_value(self.session.compute_debrief(&active).await?)
            }
            SessionChainShow { id } => serde_json::to_value(self.session.chain_show(id).await?),

            PipelineStageRecord { epic_id, stage, status, note } => {
                serde_json::to_value(self.lifecycle.record_stage_progress(epic_id, stage, status, note).await?)
            }
            PipelineDecisionPropose { content, context, rationale } => {
                serde_json::to_value(self.lifecycle.decision_propose(content, context, rationale).await?)
            }
            PipelineDecisionAccept { decision_id, accepted_by } => {
                serde_json::to_value(self.lifecycle.decision_accept(decision_id, accepted_by).await?)
            }
            PipelineDecisionSupersede { decision_id, by } => {
                self.lifecycle.decision_supersede(decision_id, by).await?;
                serde_json::to_value(())
            }
            PipelineDecisionList => serde_json::to_value(self.lifecycle.list_decisions(None).await?),
            PipelineDecisionShow { decision_id } => serde_json::to_value(self.lifecycle.get_decision(decision_id).await?),

            OrchestrateStatus { epic_id } => serde_json::to_value(self.orchestration.status(epic_id).await?),
            OrchestrateReady { epic_id } => serde_json::to_value(self.orchestration.ready(epic_id).await?),
            OrchestrateNext { epic_id } => serde_json::to_value(self.orchestration.next(epic_id).await?),
            OrchestrateWaves { epic_id } => {
                serde_json::to_value(self.orchestration.waves(epic_id, GraphConfig::default()).await?)
            }
            OrchestrateContext { task_id } => serde_json::to_value(self.orchestration.spawn(task_id).await?),
            OrchestrateValidate { task_id } => serde_json::to_value(self.orchestration.validate(task_id).await?),
            OrchestrateSpawn { task_id } => serde_json::to_value(self.orchestration.spawn(task_id).await?),
            OrchestrateStartup => serde_json::to_value(self.orchestration.startup().await?),

            ManifestAppend(entry) => serde_json::to_value(self.store.append_manifest_entry(entry).await?),

            ValidateCoherence => serde_json::to_value(self.compliance.coherence_check().await?),
            ValidateTask { id } => Ok(self.validate_task(id).await?),
            ValidateProtocol { entry } => serde_json::to_value(self.compliance.check_manifest_entry(&entry).await?),
            ValidateManifest { manifest_id } => {
                let entry = self
                    .store
                    .list_manifest()
                    .await?
                    .into_iter()
                    .find(|e| e.id == manifest_id)
                    .ok_or_else(|| CleoError::not_found(format!("manifest entry {manifest_id}")))?;
                serde_json::to_value(self.compliance.check_manifest_entry(&entry).await?)
            }

            AdminHealth => {
                self.store.health_check().await?;
                serde_json::to_value(serde_json::json!({ "status": "ok" }))
            }
            AdminSequence => serde_json::to_value(self.store.sequence().await?),
            AdminAudit { session_id } => serde_json::to_value(self.store.list_audit_for_session(session_id).await?),
        };
        value.map_err(|e| CleoError::invalid_input(format!("failed to serialize result: {e}")))
    }
}

fn entity_id(op: &Operation) -> String {
    use Operation::*;
    match op {
        TasksUpdate { id, .. } | TasksComplete { id } | TasksCancel { id } | TasksUncancel { id }
        | TasksDelete { id } | TasksArchive { id } | TasksShow { id, .. } | TasksStart { id }
        | TasksFocusSet { id } | TasksGateSet { id, .. } | ValidateTask { id }
        | TasksGetImpact { id } | TasksGetTaskTree { id } | TasksGetTaskDeps { id } => id.to_string(),
        TasksGetExecutionWaves { root } | TasksGetCriticalPath { root } => {
            root.map(|id| id.to_string()).unwrap_or_default()
        }
        PipelineStageRecord { epic_id, .. } | OrchestrateStatus { epic_id } | OrchestrateWaves { epic_id } => epic_id.to_string(),
        OrchestrateContext { task_id } | OrchestrateValidate { task_id } | OrchestrateSpawn { task_id } => task_id.to_string(),
        SessionResume { id } | SessionShow { id } | SessionChainShow { id } => id.to_string(),
        PipelineDecisionAccept { decision_id, .. } | PipelineDecisionShow { decision_id } => decision_id.to_string(),
        PipelineDecisionSupersede { decision_id, .. } => decision_id.to_string(),
        AdminAudit { session_id } => session_id.to_string(),
        ValidateManifest { manifest_id } => manifest_id.to_string(),
        ManifestAppend(entry) => entry.file_path.clone(),
        ValidateProtocol { entry } => entry.file_path.clone(),
        _ => String::new(),
    }
}

#[async_trait]
impl<S: Store + 'static> Dispatcher for CleoDispatcher<S> {
    async fn dispatch(&self, op: Operation, ctx: DispatchContext) -> DispatchResult {
        if ctx.cancellation.is_cancelled() {
            return DispatchResult::err(&CleoError::Cancelled);
        }
        let kind = op.kind();
        let _guard = match self.acquire(kind).await {
            Ok(guard) => guard,
            Err(err) => return DispatchResult::err(&err),
        };

        if kind == DispatchKind::Mutate {
            // The audit row is written *before* the mutation runs, as
            // `Failure`, and only promoted to `Success` once the mutation
            // actually commits (§4.5, §7). A store that can't durably
            // record the attempt never gets a chance to perform it, so a
            // failed audit write takes the mutation down with it instead
            // of leaving an unaudited side effect behind.
            let pending = self.build_audit_entry(&op, &ctx, AuditOutcome::Failure);
            let logged = match self.store.append_audit(pending).await {
                Ok(entry) => entry,
                Err(err) => return DispatchResult::err(&err),
            };

            let result = self.route(op, &ctx).await;
            if result.is_ok() {
                if let Err(err) = self.store.update_audit_outcome(logged.id, AuditOutcome::Success).await {
                    tracing::error!(
                        error = %err,
                        operation = logged.operation,
                        "mutation committed but failed to record its audit outcome"
                    );
                }
            }

            return match result {
                Ok(data) => DispatchResult::ok(data),
                Err(err) => DispatchResult::err(&err),
            };
        }

        let result = self.route(op.clone(), &ctx).await;
        if ctx.grade_mode {
            let outcome = if result.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failure };
            self.audit_query(&op, &ctx, outcome).await;
        }

        match result {
            Ok(data) => DispatchResult::ok(data),
            Err(err) => DispatchResult::err(&err),
        }
    }
}
