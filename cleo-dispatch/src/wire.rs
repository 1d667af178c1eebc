//! Parses the wire-level `{domain, operation, params}` triple (§4.5, §6)
//! into a typed [`Operation`]. Unknown dotted names return `E_NO_HANDLER`;
//! malformed or missing fields return `E_INVALID_INPUT` — the two failure
//! modes the dispatch layer's "registration" paragraph calls out.

use chrono::Utc;
use cleo_core::dispatch::Operation;
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use serde_json::Value;

fn field<'a>(params: &'a Value, key: &str) -> Result<&'a Value> {
    params
        .get(key)
        .ok_or_else(|| CleoError::invalid_input(format!("missing field '{key}'")))
}

fn opt_field<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

fn as_str(v: &Value, key: &str) -> Result<String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| CleoError::invalid_input(format!("field '{key}' must be a string")))
}

fn as_i64(v: &Value, key: &str) -> Result<i64> {
    v.as_i64().ok_or_else(|| CleoError::invalid_input(format!("field '{key}' must be an integer")))
}

fn as_bool(v: &Value, key: &str) -> Result<bool> {
    v.as_bool().ok_or_else(|| CleoError::invalid_input(format!("field '{key}' must be a boolean")))
}

fn deser<T: serde::de::DeserializeOwned>(v: &Value, key: &str) -> Result<T> {
    serde_json::from_value(v.clone()).map_err(|e| CleoError::invalid_input(format!("field '{key}': {e}")))
}

fn task_id(params: &Value, key: &str) -> Result<TaskId> {
    let raw = field(params, key)?;
    match raw {
        Value::String(s) => s.parse::<TaskId>().map_err(CleoError::invalid_input),
        Value::Number(n) => n.as_u64().map(TaskId::new).ok_or_else(|| CleoError::invalid_input(format!("field '{key}' is not a valid task id"))),
        _ => Err(CleoError::invalid_input(format!("field '{key}' must be a task id"))),
    }
}

fn opt_task_id(params: &Value, key: &str) -> Result<Option<TaskId>> {
    match opt_field(params, key) {
        None => Ok(None),
        Some(v) => match v {
            Value::String(s) => s.parse::<TaskId>().map(Some).map_err(CleoError::invalid_input),
            Value::Number(n) => Ok(n.as_u64().map(TaskId::new)),
            _ => Err(CleoError::invalid_input(format!("field '{key}' must be a task id"))),
        },
    }
}

fn new_task(params: &Value) -> Result<NewTask> {
    Ok(NewTask {
        title: as_str(field(params, "title")?, "title")?,
        description: as_str(field(params, "description")?, "description")?,
        priority: opt_field(params, "priority").map(|v| deser(v, "priority")).transpose()?,
        task_type: opt_field(params, "task_type").map(|v| deser(v, "task_type")).transpose()?,
        phase: opt_field(params, "phase").map(|v| as_str(v, "phase")).transpose()?,
        parent_id: opt_task_id(params, "parent_id")?,
        depends: opt_field(params, "depends").map(|v| deser(v, "depends")).transpose()?.unwrap_or_default(),
        labels: opt_field(params, "labels").map(|v| deser(v, "labels")).transpose()?.unwrap_or_default(),
        acceptance: opt_field(params, "acceptance").map(|v| deser(v, "acceptance")).transpose()?.unwrap_or_default(),
        size: opt_field(params, "size").map(|v| deser(v, "size")).transpose()?,
        created_by: opt_field(params, "created_by").map(|v| as_str(v, "created_by")).transpose()?,
    })
}

/// `Some(Value::Null)` clears the field; an absent key leaves it unchanged;
/// any other value sets it — the same `Option<Option<T>>` convention the
/// patch struct itself uses.
fn patch<T: serde::de::DeserializeOwned>(params: &Value, key: &str) -> Result<Option<Option<T>>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(v) => deser::<T>(v, key).map(|t| Some(Some(t))),
    }
}

fn update_task(params: &Value) -> Result<UpdateTask> {
    Ok(UpdateTask {
        title: opt_field(params, "title").map(|v| as_str(v, "title")).transpose()?,
        description: opt_field(params, "description").map(|v| as_str(v, "description")).transpose()?,
        priority: opt_field(params, "priority").map(|v| deser(v, "priority")).transpose()?,
        phase: patch(params, "phase")?,
        parent_id: patch(params, "parent_id")?,
        depends: opt_field(params, "depends").map(|v| deser(v, "depends")).transpose()?,
        labels: opt_field(params, "labels").map(|v| deser(v, "labels")).transpose()?,
        notes: opt_field(params, "notes").map(|v| deser(v, "notes")).transpose()?,
        files: opt_field(params, "files").map(|v| deser(v, "files")).transpose()?,
        acceptance: opt_field(params, "acceptance").map(|v| deser(v, "acceptance")).transpose()?,
        size: patch(params, "size")?,
        blocked_by: patch(params, "blocked_by")?,
        epic_lifecycle: patch(params, "epic_lifecycle")?,
    })
}

fn task_filter(params: &Value) -> Result<TaskFilter> {
    Ok(TaskFilter {
        status: opt_field(params, "status").map(|v| deser(v, "status")).transpose()?,
        priority: opt_field(params, "priority").map(|v| deser(v, "priority")).transpose()?,
        task_type: opt_field(params, "task_type").map(|v| deser(v, "task_type")).transpose()?,
        phase: opt_field(params, "phase").map(|v| as_str(v, "phase")).transpose()?,
        parent_id: opt_task_id(params, "parent_id")?,
        label: opt_field(params, "label").map(|v| as_str(v, "label")).transpose()?,
        include_archive: opt_field(params, "include_archive").map(|v| as_bool(v, "include_archive")).transpose()?.unwrap_or(false),
    })
}

fn manifest_entry(params: &Value) -> Result<DocumentManifestEntry> {
    Ok(DocumentManifestEntry {
        id: 0,
        file_path: as_str(field(params, "file_path")?, "file_path")?,
        title: as_str(field(params, "title")?, "title")?,
        date: opt_field(params, "date").map(|v| deser(v, "date")).transpose()?.unwrap_or_else(Utc::now),
        status: opt_field(params, "status").map(|v| as_str(v, "status")).transpose()?.unwrap_or_else(|| "draft".to_string()),
        agent_type: deser(field(params, "agent_type")?, "agent_type")?,
        topics_json: opt_field(params, "topics").map(|v| deser(v, "topics")).transpose()?.unwrap_or_default(),
        key_findings_json: opt_field(params, "key_findings").map(|v| deser(v, "key_findings")).transpose()?.unwrap_or_default(),
        actionable: opt_field(params, "actionable").map(|v| as_bool(v, "actionable")).transpose()?.unwrap_or(false),
        needs_followup_json: opt_field(params, "needs_followup").map(|v| deser(v, "needs_followup")).transpose()?.unwrap_or_default(),
        linked_tasks_json: opt_field(params, "linked_tasks").map(|v| deser(v, "linked_tasks")).transpose()?.unwrap_or_default(),
    })
}

/// Maps a `(domain, operation)` pair and its JSON params onto the closed
/// [`Operation`] enum. `full` is `"{domain}.{operation}"`; callers that
/// already carry a combined dotted string (CLI argv, RPC `method`) can pass
/// it straight through.
pub fn parse(full: &str, params: Value) -> Result<Operation> {
    let params = if params.is_null() { Value::Object(Default::default()) } else { params };
    Ok(match full {
        "tasks.add" => Operation::TasksAdd(new_task(&params)?),
        "tasks.update" => Operation::TasksUpdate { id: task_id(&params, "id")?, updates: update_task(&params)? },
        "tasks.complete" => Operation::TasksComplete { id: task_id(&params, "id")? },
        "tasks.cancel" => Operation::TasksCancel { id: task_id(&params, "id")? },
        "tasks.uncancel" => Operation::TasksUncancel { id: task_id(&params, "id")? },
        "tasks.delete" => Operation::TasksDelete { id: task_id(&params, "id")? },
        "tasks.archive" => Operation::TasksArchive { id: task_id(&params, "id")? },
        "tasks.find" => Operation::TasksFind { query: as_str(field(&params, "query")?, "query")? },
        "tasks.show" => Operation::TasksShow {
            id: task_id(&params, "id")?,
            include_archive: opt_field(&params, "include_archive").map(|v| as_bool(v, "include_archive")).transpose()?.unwrap_or(false),
        },
        "tasks.list" => Operation::TasksList(task_filter(&params)?),
        "tasks.start" => Operation::TasksStart { id: task_id(&params, "id")? },
        "tasks.stop" => Operation::TasksStop,
        "tasks.current" => Operation::TasksCurrent,
        "tasks.focus.set" => Operation::TasksFocusSet { id: task_id(&params, "id")? },
        "tasks.focus.clear" => Operation::TasksFocusClear,
        "tasks.focus.show" => Operation::TasksFocusShow,
        "tasks.gate.set" => Operation::TasksGateSet {
            id: task_id(&params, "id")?,
            gate: deser(field(&params, "gate")?, "gate")?,
            value: as_bool(field(&params, "value")?, "value")?,
            agent: as_str(field(&params, "agent")?, "agent")?,
        },
        "tasks.getExecutionWaves" => Operation::TasksGetExecutionWaves { root: opt_task_id(&params, "root")? },
        "tasks.getCriticalPath" => Operation::TasksGetCriticalPath { root: opt_task_id(&params, "root")? },
        "tasks.getImpact" => Operation::TasksGetImpact { id: task_id(&params, "id")? },
        "tasks.detectCycles" => Operation::TasksDetectCycles,
        "tasks.getTaskTree" => Operation::TasksGetTaskTree { id: task_id(&params, "id")? },
        "tasks.getTaskDeps" => Operation::TasksGetTaskDeps { id: task_id(&params, "id")? },

        "session.start" => Operation::SessionStart {
            scope: as_str(field(&params, "scope")?, "scope")?,
            agent_identifier: opt_field(&params, "agent_identifier").map(|v| as_str(v, "agent_identifier")).transpose()?,
            grade_mode: opt_field(&params, "grade_mode").map(|v| as_bool(v, "grade_mode")).transpose()?.unwrap_or(false),
        },
        "session.end" => Operation::SessionEnd,
        "session.suspend" => Operation::SessionSuspend,
        "session.resume" => Operation::SessionResume { id: as_i64(field(&params, "id")?, "id")? },
        "session.status" => Operation::SessionStatus,
        "session.list" => Operation::SessionList,
        "session.show" => Operation::SessionShow { id: as_i64(field(&params, "id")?, "id")? },
        "session.briefing" => Operation::SessionBriefing,
        "session.handoff" => Operation::SessionHandoff,
        "session.debrief.compute" => Operation::SessionDebriefCompute,
        "session.chain.show" => Operation::SessionChainShow { id: as_i64(field(&params, "id")?, "id")? },

        "pipeline.stage.record" => Operation::PipelineStageRecord {
            epic_id: task_id(&params, "epic_id")?,
            stage: deser(field(&params, "stage")?, "stage")?,
            status: deser(field(&params, "status")?, "status")?,
            note: opt_field(&params, "note").map(|v| as_str(v, "note")).transpose()?,
        },
        "pipeline.decision.propose" => Operation::PipelineDecisionPropose {
            content: as_str(field(&params, "content")?, "content")?,
            context: as_str(field(&params, "context")?, "context")?,
            rationale: as_str(field(&params, "rationale")?, "rationale")?,
        },
        "pipeline.decision.accept" => Operation::PipelineDecisionAccept {
            decision_id: as_i64(field(&params, "decision_id")?, "decision_id")?,
            accepted_by: as_str(field(&params, "accepted_by")?, "accepted_by")?,
        },
        "pipeline.decision.supersede" => Operation::PipelineDecisionSupersede {
            decision_id: as_i64(field(&params, "decision_id")?, "decision_id")?,
            by: as_i64(field(&params, "by")?, "by")?,
        },
        "pipeline.decision.list" => Operation::PipelineDecisionList,
        "pipeline.decision.show" => Operation::PipelineDecisionShow { decision_id: as_i64(field(&params, "decision_id")?, "decision_id")? },

        "orchestrate.status" => Operation::OrchestrateStatus { epic_id: task_id(&params, "epic_id")? },
        "orchestrate.ready" => Operation::OrchestrateReady { epic_id: opt_task_id(&params, "epic_id")? },
        "orchestrate.next" => Operation::OrchestrateNext { epic_id: opt_task_id(&params, "epic_id")? },
        "orchestrate.waves" => Operation::OrchestrateWaves { epic_id: task_id(&params, "epic_id")? },
        "orchestrate.context" => Operation::OrchestrateContext { task_id: task_id(&params, "task_id")? },
        "orchestrate.validate" => Operation::OrchestrateValidate { task_id: task_id(&params, "task_id")? },
        "orchestrate.spawn" => Operation::OrchestrateSpawn { task_id: task_id(&params, "task_id")? },
        "orchestrate.startup" => Operation::OrchestrateStartup,

        "manifest.append" => Operation::ManifestAppend(manifest_entry(&params)?),

        "validate.coherence" => Operation::ValidateCoherence,
        "validate.task" => Operation::ValidateTask { id: task_id(&params, "id")? },
        "validate.protocol" => Operation::ValidateProtocol { entry: manifest_entry(&params)? },
        "validate.manifest" => Operation::ValidateManifest { manifest_id: as_i64(field(&params, "manifest_id")?, "manifest_id")? },

        "admin.health" => Operation::AdminHealth,
        "admin.sequence" => Operation::AdminSequence,
        "admin.audit" => Operation::AdminAudit { session_id: as_i64(field(&params, "session_id")?, "session_id")? },

        other => return Err(CleoError::NoHandler(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tasks_add() {
        let op = parse("tasks.add", json!({"title": "a", "description": "b"})).unwrap();
        assert!(matches!(op, Operation::TasksAdd(_)));
    }

    #[test]
    fn unknown_dotted_name_is_no_handler() {
        let err = parse("tasks.teleport", json!({})).unwrap_err();
        assert_eq!(err.code(), "E_NO_HANDLER");
    }

    #[test]
    fn missing_field_is_invalid_input() {
        let err = parse("tasks.add", json!({"title": "a"})).unwrap_err();
        assert_eq!(err.code(), "E_INVALID_INPUT");
    }

    #[test]
    fn parses_task_id_from_string() {
        let op = parse("tasks.complete", json!({"id": "T001"})).unwrap();
        assert_eq!(op, Operation::TasksComplete { id: TaskId::new(1) });
    }
}
