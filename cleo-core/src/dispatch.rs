//! The dispatch contract (§4.5): a uniform `dispatch(kind, domain,
//! operation, params, context)` entry point shared by every frontend.
//!
//! Per §9's design note ("a systems-language rewrite should keep the
//! runtime registry but back it with exhaustive tagged variants"), the
//! wire-level `domain`/`operation` strings are parsed into a closed
//! `Operation` enum up front. A `match` over `Operation` in `cleo-dispatch`
//! is then exhaustiveness-checked by the compiler — forgetting to wire up
//! a handler for a new variant is a build error, not a runtime surprise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::CleoError;
use crate::models::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Query,
    Mutate,
}

/// The closed operation vocabulary (§6 "operation surface"). Variants are
/// grouped by the dotted-name domain they belong to; `as_dotted()` and
/// `parse_dotted()` are the two directions of the wire-level name mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    TasksAdd(NewTask),
    TasksUpdate { id: TaskId, updates: UpdateTask },
    TasksComplete { id: TaskId },
    TasksCancel { id: TaskId },
    TasksUncancel { id: TaskId },
    TasksDelete { id: TaskId },
    TasksArchive { id: TaskId },
    TasksFind { query: String },
    TasksShow { id: TaskId, include_archive: bool },
    TasksList(TaskFilter),
    TasksStart { id: TaskId },
    TasksStop,
    TasksCurrent,
    TasksFocusSet { id: TaskId },
    TasksFocusClear,
    TasksFocusShow,
    TasksGateSet { id: TaskId, gate: GateName, value: bool, agent: String },
    TasksGetExecutionWaves { root: Option<TaskId> },
    TasksGetCriticalPath { root: Option<TaskId> },
    TasksGetImpact { id: TaskId },
    TasksDetectCycles,
    TasksGetTaskTree { id: TaskId },
    TasksGetTaskDeps { id: TaskId },

    SessionStart { scope: String, agent_identifier: Option<String>, grade_mode: bool },
    SessionEnd,
    SessionSuspend,
    SessionResume { id: i64 },
    SessionStatus,
    SessionList,
    SessionShow { id: i64 },
    SessionBriefing,
    SessionHandoff,
    SessionDebriefCompute,
    SessionChainShow { id: i64 },

    PipelineStageRecord { epic_id: TaskId, stage: StageName, status: StageStatus, note: Option<String> },
    PipelineDecisionPropose { content: String, context: String, rationale: String },
    PipelineDecisionAccept { decision_id: i64, accepted_by: String },
    PipelineDecisionSupersede { decision_id: i64, by: i64 },
    PipelineDecisionList,
    PipelineDecisionShow { decision_id: i64 },

    OrchestrateStatus { epic_id: TaskId },
    OrchestrateReady { epic_id: Option<TaskId> },
    OrchestrateNext { epic_id: Option<TaskId> },
    OrchestrateWaves { epic_id: TaskId },
    OrchestrateContext { task_id: TaskId },
    OrchestrateValidate { task_id: TaskId },
    OrchestrateSpawn { task_id: TaskId },
    OrchestrateStartup,

    ManifestAppend(DocumentManifestEntry),

    ValidateCoherence,
    ValidateTask { id: TaskId },
    ValidateProtocol { entry: DocumentManifestEntry },
    ValidateManifest { manifest_id: i64 },

    AdminHealth,
    AdminSequence,
    AdminAudit { session_id: i64 },
}

impl Operation {
    pub fn as_dotted(&self) -> &'static str {
        match self {
            Operation::TasksAdd(_) => "tasks.add",
            Operation::TasksUpdate { .. } => "tasks.update",
            Operation::TasksComplete { .. } => "tasks.complete",
            Operation::TasksCancel { .. } => "tasks.cancel",
            Operation::TasksUncancel { .. } => "tasks.uncancel",
            Operation::TasksDelete { .. } => "tasks.delete",
            Operation::TasksArchive { .. } => "tasks.archive",
            Operation::TasksFind { .. } => "tasks.find",
            Operation::TasksShow { .. } => "tasks.show",
            Operation::TasksList(_) => "tasks.list",
            Operation::TasksStart { .. } => "tasks.start",
            Operation::TasksStop => "tasks.stop",
            Operation::TasksCurrent => "tasks.current",
            Operation::TasksFocusSet { .. } => "tasks.focus.set",
            Operation::TasksFocusClear => "tasks.focus.clear",
            Operation::TasksFocusShow => "tasks.focus.show",
            Operation::TasksGateSet { .. } => "tasks.gate.set",
            Operation::TasksGetExecutionWaves { .. } => "tasks.getExecutionWaves",
            Operation::TasksGetCriticalPath { .. } => "tasks.getCriticalPath",
            Operation::TasksGetImpact { .. } => "tasks.getImpact",
            Operation::TasksDetectCycles => "tasks.detectCycles",
            Operation::TasksGetTaskTree { .. } => "tasks.getTaskTree",
            Operation::TasksGetTaskDeps { .. } => "tasks.getTaskDeps",
            Operation::SessionStart { .. } => "session.start",
            Operation::SessionEnd => "session.end",
            Operation::SessionSuspend => "session.suspend",
            Operation::SessionResume { .. } => "session.resume",
            Operation::SessionStatus => "session.status",
            Operation::SessionList => "session.list",
            Operation::SessionShow { .. } => "session.show",
            Operation::SessionBriefing => "session.briefing",
            Operation::SessionHandoff => "session.handoff",
            Operation::SessionDebriefCompute => "session.debrief.compute",
            Operation::SessionChainShow { .. } => "session.chain.show",
            Operation::PipelineStageRecord { .. } => "pipeline.stage.record",
            Operation::PipelineDecisionPropose { .. } => "pipeline.decision.propose",
            Operation::PipelineDecisionAccept { .. } => "pipeline.decision.accept",
            Operation::PipelineDecisionSupersede { .. } => "pipeline.decision.supersede",
            Operation::PipelineDecisionList => "pipeline.decision.list",
            Operation::PipelineDecisionShow { .. } => "pipeline.decision.show",
            Operation::OrchestrateStatus { .. } => "orchestrate.status",
            Operation::OrchestrateReady { .. } => "orchestrate.ready",
            Operation::OrchestrateNext { .. } => "orchestrate.next",
            Operation::OrchestrateWaves { .. } => "orchestrate.waves",
            Operation::OrchestrateContext { .. } => "orchestrate.context",
            Operation::OrchestrateValidate { .. } => "orchestrate.validate",
            Operation::OrchestrateSpawn { .. } => "orchestrate.spawn",
            Operation::OrchestrateStartup => "orchestrate.startup",
            Operation::ManifestAppend(_) => "manifest.append",
            Operation::ValidateCoherence => "validate.coherence",
            Operation::ValidateTask { .. } => "validate.task",
            Operation::ValidateProtocol { .. } => "validate.protocol",
            Operation::ValidateManifest { .. } => "validate.manifest",
            Operation::AdminHealth => "admin.health",
            Operation::AdminSequence => "admin.sequence",
            Operation::AdminAudit { .. } => "admin.audit",
        }
    }

    pub fn kind(&self) -> DispatchKind {
        use Operation::*;
        match self {
            TasksAdd(_) | TasksUpdate { .. } | TasksComplete { .. } | TasksCancel { .. }
            | TasksUncancel { .. } | TasksDelete { .. } | TasksArchive { .. }
            | TasksStart { .. } | TasksStop | TasksFocusSet { .. } | TasksFocusClear
            | TasksGateSet { .. } | SessionStart { .. } | SessionEnd | SessionSuspend
            | SessionResume { .. } | SessionDebriefCompute | PipelineStageRecord { .. }
            | PipelineDecisionPropose { .. } | PipelineDecisionAccept { .. }
            | PipelineDecisionSupersede { .. } | ManifestAppend(_) | ValidateProtocol { .. }
            | ValidateManifest { .. } => DispatchKind::Mutate,
            _ => DispatchKind::Query,
        }
    }
}

/// Carried alongside every dispatch call: the resolved session/agent,
/// a cancellation token, and whether grade-mode audit applies to queries
/// too (§4.4 "grade mode").
#[derive(Clone)]
pub struct DispatchContext {
    pub session_id: Option<i64>,
    pub agent_id: Option<String>,
    pub grade_mode: bool,
    pub cancellation: CancellationToken,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self {
            session_id: None,
            agent_id: None,
            grade_mode: false,
            cancellation: CancellationToken::new(),
        }
    }
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub exit_code: i32,
    pub fix: Option<String>,
    pub alternatives: Option<Vec<String>>,
}

impl From<&CleoError> for ErrorEnvelope {
    fn from(err: &CleoError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            exit_code: err.exit_code(),
            fix: err.fix(),
            alternatives: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "success")]
pub enum DispatchResult {
    #[serde(rename = "true")]
    Ok { data: Value },
    #[serde(rename = "false")]
    Err { error: ErrorEnvelope },
}

impl DispatchResult {
    pub fn ok(data: Value) -> Self {
        Self::Ok { data }
    }

    pub fn err(err: &CleoError) -> Self {
        Self::Err { error: err.into() }
    }
}

/// The registry entry point every frontend calls through. `cleo-dispatch`
/// provides the concrete implementation; this trait lets `cleo-server` and
/// `cleo-cli` depend only on the contract.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, op: Operation, ctx: DispatchContext) -> DispatchResult;
}

pub type SharedDispatcher = Arc<dyn Dispatcher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_matches_mutate_vs_query() {
        assert_eq!(Operation::TasksStop.kind(), DispatchKind::Mutate);
        assert_eq!(Operation::OrchestrateReady { epic_id: None }.kind(), DispatchKind::Query);
    }

    #[test]
    fn error_envelope_carries_exit_code() {
        let err = CleoError::HandoffRequired;
        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.exit_code, 65);
        assert_eq!(envelope.code, "E_HANDOFF_REQUIRED");
    }
}
