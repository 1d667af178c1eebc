//! Enum string conversions, row-to-struct mapping, JSON column helpers,
//! and sqlx error translation shared by every table accessor in `sqlite.rs`.

use chrono::{DateTime, Utc};
use cleo_core::error::CleoError;
use cleo_core::models::*;
use sqlx::{sqlite::SqliteRow, Row};
use std::collections::HashMap;
use std::str::FromStr;

pub fn task_status_to_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Active => "active",
        TaskStatus::Blocked => "blocked",
        TaskStatus::Done => "done",
        TaskStatus::Cancelled => "cancelled",
    }
}

pub fn str_to_task_status(s: &str) -> cleo_core::Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "active" => Ok(TaskStatus::Active),
        "blocked" => Ok(TaskStatus::Blocked),
        "done" => Ok(TaskStatus::Done),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(CleoError::Store(format!("invalid task status in database: {other}"))),
    }
}

pub fn task_priority_to_str(p: TaskPriority) -> &'static str {
    match p {
        TaskPriority::Low => "low",
        TaskPriority::Medium => "medium",
        TaskPriority::High => "high",
        TaskPriority::Critical => "critical",
    }
}

pub fn str_to_task_priority(s: &str) -> cleo_core::Result<TaskPriority> {
    match s {
        "low" => Ok(TaskPriority::Low),
        "medium" => Ok(TaskPriority::Medium),
        "high" => Ok(TaskPriority::High),
        "critical" => Ok(TaskPriority::Critical),
        other => Err(CleoError::Store(format!("invalid priority in database: {other}"))),
    }
}

pub fn task_type_to_str(t: TaskType) -> &'static str {
    match t {
        TaskType::Epic => "epic",
        TaskType::Task => "task",
        TaskType::Subtask => "subtask",
        TaskType::Bug => "bug",
    }
}

pub fn str_to_task_type(s: &str) -> cleo_core::Result<TaskType> {
    match s {
        "epic" => Ok(TaskType::Epic),
        "task" => Ok(TaskType::Task),
        "subtask" => Ok(TaskType::Subtask),
        "bug" => Ok(TaskType::Bug),
        other => Err(CleoError::Store(format!("invalid task type in database: {other}"))),
    }
}

pub fn task_size_to_str(s: TaskSize) -> &'static str {
    match s {
        TaskSize::Small => "small",
        TaskSize::Medium => "medium",
        TaskSize::Large => "large",
    }
}

pub fn str_to_task_size(s: &str) -> cleo_core::Result<TaskSize> {
    match s {
        "small" => Ok(TaskSize::Small),
        "medium" => Ok(TaskSize::Medium),
        "large" => Ok(TaskSize::Large),
        other => Err(CleoError::Store(format!("invalid size in database: {other}"))),
    }
}

pub fn epic_lifecycle_to_str(e: EpicLifecycle) -> &'static str {
    match e {
        EpicLifecycle::Active => "active",
        EpicLifecycle::Review => "review",
        EpicLifecycle::Done => "done",
    }
}

pub fn str_to_epic_lifecycle(s: &str) -> cleo_core::Result<EpicLifecycle> {
    match s {
        "active" => Ok(EpicLifecycle::Active),
        "review" => Ok(EpicLifecycle::Review),
        "done" => Ok(EpicLifecycle::Done),
        other => Err(CleoError::Store(format!("invalid epicLifecycle in database: {other}"))),
    }
}

pub fn ids_to_json(ids: &[TaskId]) -> String {
    serde_json::to_string(&ids.iter().map(|i| i.0).collect::<Vec<_>>()).unwrap_or_else(|_| "[]".into())
}

pub fn json_to_ids(s: &str) -> Vec<TaskId> {
    serde_json::from_str::<Vec<u64>>(s)
        .unwrap_or_default()
        .into_iter()
        .map(TaskId::new)
        .collect()
}

pub fn strings_to_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

pub fn json_to_strings(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

pub fn gates_to_json(gates: &HashMap<GateName, GateValue>) -> String {
    let as_strings: HashMap<String, GateValue> =
        gates.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    serde_json::to_string(&as_strings).unwrap_or_else(|_| "{}".into())
}

pub fn json_to_gates(s: &str) -> HashMap<GateName, GateValue> {
    let as_strings: HashMap<String, GateValue> = serde_json::from_str(s).unwrap_or_default();
    let mut gates: HashMap<GateName, GateValue> = GATE_ORDER.iter().map(|g| (*g, None)).collect();
    for (k, v) in as_strings {
        if let Some(gate) = str_to_gate_name(&k) {
            gates.insert(gate, v);
        }
    }
    gates
}

fn str_to_gate_name(s: &str) -> Option<GateName> {
    match s {
        "implemented" => Some(GateName::Implemented),
        "testsPassed" => Some(GateName::TestsPassed),
        "qaPassed" => Some(GateName::QaPassed),
        "cleanupDone" => Some(GateName::CleanupDone),
        "securityPassed" => Some(GateName::SecurityPassed),
        "documented" => Some(GateName::Documented),
        _ => None,
    }
}

pub fn failure_log_to_json(log: &[FailureLogEntry]) -> String {
    serde_json::to_string(log).unwrap_or_else(|_| "[]".into())
}

pub fn json_to_failure_log(s: &str) -> Vec<FailureLogEntry> {
    serde_json::from_str(s).unwrap_or_default()
}

pub fn row_to_task(row: &SqliteRow) -> cleo_core::Result<Task> {
    let id: i64 = row.get("id");
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let task_type: String = row.get("task_type");
    let size: Option<String> = row.try_get("size").ok().flatten();
    let epic_lifecycle: Option<String> = row.try_get("epic_lifecycle").ok().flatten();
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    let gates = json_to_gates(&row.get::<String, _>("verification_gates_json"));
    let verification = Verification {
        gates,
        round: row.get::<i64, _>("verification_round") as u32,
        last_agent: row.try_get("verification_last_agent").ok().flatten(),
        last_updated: row.try_get("verification_last_updated").ok().flatten(),
        failure_log: json_to_failure_log(&row.get::<String, _>("verification_failure_log_json")),
    };

    Ok(Task {
        id: TaskId::new(id as u64),
        title: row.get("title"),
        description: row.get("description"),
        status: str_to_task_status(&status)?,
        priority: str_to_task_priority(&priority)?,
        task_type: str_to_task_type(&task_type)?,
        phase: row.try_get("phase").ok().flatten(),
        parent_id: row
            .try_get::<Option<i64>, _>("parent_id")
            .ok()
            .flatten()
            .map(|p| TaskId::new(p as u64)),
        depends: json_to_ids(&row.get::<String, _>("depends_json")),
        labels: json_to_strings(&row.get::<String, _>("labels_json")),
        notes: json_to_strings(&row.get::<String, _>("notes_json")),
        files: json_to_strings(&row.get::<String, _>("files_json")),
        acceptance: json_to_strings(&row.get::<String, _>("acceptance_json")),
        size: size.map(|s| str_to_task_size(&s)).transpose()?,
        created_at,
        updated_at,
        completed_at: row.try_get("completed_at").ok().flatten(),
        cancelled_at: row.try_get("cancelled_at").ok().flatten(),
        blocked_by: row.try_get("blocked_by").ok().flatten(),
        verification,
        epic_lifecycle: epic_lifecycle.map(|e| str_to_epic_lifecycle(&e)).transpose()?,
        created_by: row.try_get("created_by").ok().flatten(),
    })
}

pub fn sqlx_error_to_store_error(err: sqlx::Error) -> CleoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.message().contains("UNIQUE constraint failed") {
            return CleoError::InvalidInput(format!("unique constraint violated: {}", db_err.message()));
        }
    }
    CleoError::Store(err.to_string())
}

pub fn session_status_to_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Active => "active",
        SessionStatus::Suspended => "suspended",
        SessionStatus::Ended => "ended",
        SessionStatus::Archived => "archived",
    }
}

pub fn str_to_session_status(s: &str) -> cleo_core::Result<SessionStatus> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "suspended" => Ok(SessionStatus::Suspended),
        "ended" => Ok(SessionStatus::Ended),
        "archived" => Ok(SessionStatus::Archived),
        other => Err(CleoError::Store(format!("invalid session status: {other}"))),
    }
}

pub fn scope_type_to_str(s: ScopeType) -> &'static str {
    match s {
        ScopeType::Task => "task",
        ScopeType::Epic => "epic",
        ScopeType::Phase => "phase",
        ScopeType::Project => "project",
    }
}

pub fn str_to_scope_type(s: &str) -> cleo_core::Result<ScopeType> {
    match s {
        "task" => Ok(ScopeType::Task),
        "epic" => Ok(ScopeType::Epic),
        "phase" => Ok(ScopeType::Phase),
        "project" => Ok(ScopeType::Project),
        other => Err(CleoError::Store(format!("invalid scope type: {other}"))),
    }
}

pub fn row_to_session(row: &SqliteRow) -> cleo_core::Result<Session> {
    let status: String = row.get("status");
    let scope_type: String = row.get("scope_type");
    let stats_json: String = row.get("stats_json");
    Ok(Session {
        id: row.get("id"),
        status: str_to_session_status(&status)?,
        scope: SessionScope {
            scope_type: str_to_scope_type(&scope_type)?,
            root_task_id: row
                .try_get::<Option<i64>, _>("scope_root_task_id")
                .ok()
                .flatten()
                .map(|v| TaskId::new(v as u64)),
            include_descendants: row.get::<i64, _>("scope_include_descendants") != 0,
        },
        task_work: row
            .try_get::<Option<i64>, _>("task_work_task_id")
            .ok()
            .flatten()
            .map(|v| TaskWorkRef { task_id: TaskId::new(v as u64) }),
        started_at: row.get("started_at"),
        ended_at: row.try_get("ended_at").ok().flatten(),
        suspended_at: row.try_get("suspended_at").ok().flatten(),
        suspend_count: row.get::<i64, _>("suspend_count") as u32,
        resume_count: row.get::<i64, _>("resume_count") as u32,
        stats: serde_json::from_str(&stats_json).unwrap_or_default(),
        agent_identifier: row.try_get("agent_identifier").ok().flatten(),
        previous_session_id: row.try_get("previous_session_id").ok().flatten(),
        next_session_id: row.try_get("next_session_id").ok().flatten(),
        handoff_json: row
            .try_get::<Option<String>, _>("handoff_json")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        debrief_json: row
            .try_get::<Option<String>, _>("debrief_json")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        handoff_consumed_at: row.try_get("handoff_consumed_at").ok().flatten(),
        handoff_consumed_by: row.try_get("handoff_consumed_by").ok().flatten(),
        grade_mode: row.get::<i64, _>("grade_mode") != 0,
    })
}

pub fn stage_name_to_str(s: StageName) -> &'static str {
    match s {
        StageName::Research => "research",
        StageName::Consensus => "consensus",
        StageName::Adr => "adr",
        StageName::Specification => "specification",
        StageName::Decomposition => "decomposition",
        StageName::Implementation => "implementation",
        StageName::Contribution => "contribution",
        StageName::Release => "release",
    }
}

pub fn str_to_stage_name(s: &str) -> cleo_core::Result<StageName> {
    STAGE_ORDER
        .iter()
        .find(|st| stage_name_to_str(**st) == s)
        .copied()
        .ok_or_else(|| CleoError::Store(format!("invalid stage name: {s}")))
}

pub fn stage_status_to_str(s: StageStatus) -> &'static str {
    match s {
        StageStatus::Pending => "pending",
        StageStatus::Active => "active",
        StageStatus::Blocked => "blocked",
        StageStatus::Completed => "completed",
        StageStatus::Skipped => "skipped",
    }
}

pub fn str_to_stage_status(s: &str) -> cleo_core::Result<StageStatus> {
    match s {
        "pending" => Ok(StageStatus::Pending),
        "active" => Ok(StageStatus::Active),
        "blocked" => Ok(StageStatus::Blocked),
        "completed" => Ok(StageStatus::Completed),
        "skipped" => Ok(StageStatus::Skipped),
        other => Err(CleoError::Store(format!("invalid stage status: {other}"))),
    }
}

pub fn row_to_stage(row: &SqliteRow) -> cleo_core::Result<LifecycleStage> {
    Ok(LifecycleStage {
        id: row.get("id"),
        pipeline_id: row.get("pipeline_id"),
        stage_name: str_to_stage_name(&row.get::<String, _>("stage_name"))?,
        status: str_to_stage_status(&row.get::<String, _>("status"))?,
        started_at: row.try_get("started_at").ok().flatten(),
        completed_at: row.try_get("completed_at").ok().flatten(),
        skip_reason: row.try_get("skip_reason").ok().flatten(),
        notes_json: row
            .try_get::<Option<String>, _>("notes_json")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        metadata_json: row
            .try_get::<Option<String>, _>("metadata_json")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        output_file: row.try_get("output_file").ok().flatten(),
        provenance_chain_json: row
            .try_get::<Option<String>, _>("provenance_chain_json")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
    })
}

pub fn pipeline_status_to_str(s: PipelineStatus) -> &'static str {
    match s {
        PipelineStatus::Active => "active",
        PipelineStatus::Completed => "completed",
        PipelineStatus::Blocked => "blocked",
        PipelineStatus::Failed => "failed",
        PipelineStatus::Cancelled => "cancelled",
        PipelineStatus::Aborted => "aborted",
    }
}

pub fn str_to_pipeline_status(s: &str) -> cleo_core::Result<PipelineStatus> {
    match s {
        "active" => Ok(PipelineStatus::Active),
        "completed" => Ok(PipelineStatus::Completed),
        "blocked" => Ok(PipelineStatus::Blocked),
        "failed" => Ok(PipelineStatus::Failed),
        "cancelled" => Ok(PipelineStatus::Cancelled),
        "aborted" => Ok(PipelineStatus::Aborted),
        other => Err(CleoError::Store(format!("invalid pipeline status: {other}"))),
    }
}

pub fn decision_status_to_str(s: DecisionStatus) -> &'static str {
    match s {
        DecisionStatus::Proposed => "proposed",
        DecisionStatus::Accepted => "accepted",
        DecisionStatus::Superseded => "superseded",
        DecisionStatus::Deprecated => "deprecated",
    }
}

pub fn str_to_decision_status(s: &str) -> cleo_core::Result<DecisionStatus> {
    match s {
        "proposed" => Ok(DecisionStatus::Proposed),
        "accepted" => Ok(DecisionStatus::Accepted),
        "superseded" => Ok(DecisionStatus::Superseded),
        "deprecated" => Ok(DecisionStatus::Deprecated),
        other => Err(CleoError::Store(format!("invalid decision status: {other}"))),
    }
}

pub fn row_to_decision(row: &SqliteRow) -> cleo_core::Result<Decision> {
    Ok(Decision {
        id: row.get("id"),
        status: str_to_decision_status(&row.get::<String, _>("status"))?,
        consensus_manifest_id: row.try_get("consensus_manifest_id").ok().flatten(),
        supersedes_id: row.try_get("supersedes_id").ok().flatten(),
        superseded_by_id: row.try_get("superseded_by_id").ok().flatten(),
        content: row.get("content"),
        context: row.get("context"),
        rationale: row.get("rationale"),
        consequences_json: row
            .try_get::<Option<String>, _>("consequences_json")
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok()),
        accepted_by: row.try_get("accepted_by").ok().flatten(),
        accepted_at: row.try_get("accepted_at").ok().flatten(),
        created_at: row.get("created_at"),
    })
}

pub fn audit_outcome_to_str(o: AuditOutcome) -> &'static str {
    match o {
        AuditOutcome::Success => "success",
        AuditOutcome::Failure => "failure",
    }
}

pub fn str_to_audit_outcome(s: &str) -> cleo_core::Result<AuditOutcome> {
    match s {
        "success" => Ok(AuditOutcome::Success),
        "failure" => Ok(AuditOutcome::Failure),
        other => Err(CleoError::Store(format!("invalid audit outcome: {other}"))),
    }
}

pub fn gate_enforcement_from_config(s: &str) -> GateEnforcement {
    match s {
        "advisory" => GateEnforcement::Advisory,
        "off" => GateEnforcement::Off,
        _ => GateEnforcement::Strict,
    }
}

pub fn _unused_fromstr_import_anchor() -> Option<TaskId> {
    // keeps `FromStr` import live for `TaskId::from_str` call sites in this module's users
    TaskId::from_str("T000").ok()
}
