//! End-to-end scenario tests against the dispatch contract (§8 "Concrete
//! scenarios"), exercised through `CleoDispatcher<MockStore>` exactly as a
//! frontend would call it.

use std::sync::Arc;

use cleo_core::dispatch::{DispatchContext, DispatchResult, ErrorEnvelope};
use cleo_core::models::*;
use cleo_core::store::Store;
use cleo_dispatch::CleoDispatcher;
use cleo_engine::GraphConfig;
use cleo_mocks::builders::TaskBuilder;
use cleo_mocks::MockStore;
use serde_json::json;

fn setup(store: MockStore) -> (CleoDispatcher<MockStore>, Arc<MockStore>, tempfile::TempDir) {
    let store = Arc::new(store);
    let dir = tempfile::tempdir().expect("tempdir");
    let dispatcher = CleoDispatcher::new(store.clone(), GraphConfig::default(), dir.path().to_path_buf(), GateEnforcement::Strict);
    (dispatcher, store, dir)
}

fn ctx() -> DispatchContext {
    DispatchContext::new()
}

fn ctx_session(session_id: i64) -> DispatchContext {
    DispatchContext {
        session_id: Some(session_id),
        ..DispatchContext::new()
    }
}

fn unwrap_ok(result: DispatchResult) -> serde_json::Value {
    match result {
        DispatchResult::Ok { data } => data,
        DispatchResult::Err { error } => panic!("expected success, got error: {error:?}"),
    }
}

fn unwrap_err(result: DispatchResult) -> ErrorEnvelope {
    match result {
        DispatchResult::Ok { data } => panic!("expected an error, got data: {data:?}"),
        DispatchResult::Err { error } => error,
    }
}

#[tokio::test]
async fn s1_dependency_wave_partitions_by_resolved_depends() {
    let t1 = TaskBuilder::new().with_id(1).with_status(TaskStatus::Done).build();
    let t2 = TaskBuilder::new().with_id(2).with_depends(vec![TaskId::new(1)]).build();
    let t3 = TaskBuilder::new().with_id(3).with_depends(vec![TaskId::new(1)]).build();
    let t4 = TaskBuilder::new().with_id(4).with_depends(vec![TaskId::new(2), TaskId::new(3)]).build();
    let (dispatcher, _store, _dir) = setup(MockStore::with_tasks(vec![t1, t2, t3, t4]));

    let waves = unwrap_ok(dispatcher.dispatch_wire("tasks.getExecutionWaves", json!({}), ctx()).await);
    let waves: Vec<Vec<TaskId>> = serde_json::from_value(waves).unwrap();
    assert_eq!(waves, vec![vec![TaskId::new(2), TaskId::new(3)], vec![TaskId::new(4)]]);

    let ready = unwrap_ok(dispatcher.dispatch_wire("orchestrate.ready", json!({}), ctx()).await);
    let ready: Vec<Task> = serde_json::from_value(ready).unwrap();
    assert_eq!(ready.iter().map(|t| t.id).collect::<Vec<_>>(), vec![TaskId::new(2), TaskId::new(3)]);

    let next = unwrap_ok(dispatcher.dispatch_wire("orchestrate.next", json!({}), ctx()).await);
    let next: Option<Task> = serde_json::from_value(next).unwrap();
    assert_eq!(next.unwrap().id, TaskId::new(2));
}

#[tokio::test]
async fn s2_active_task_invariant_demotes_previous_and_syncs_task_work() {
    let t1 = TaskBuilder::new().with_id(1).build();
    let t2 = TaskBuilder::new().with_id(2).build();
    let (dispatcher, _store, _dir) = setup(MockStore::with_tasks(vec![t1, t2]));

    let started = unwrap_ok(dispatcher.dispatch_wire("session.start", json!({ "scope": "project:" }), ctx()).await);
    let session: Session = serde_json::from_value(started["session"].clone()).unwrap();
    let sctx = ctx_session(session.id);

    unwrap_ok(dispatcher.dispatch_wire("tasks.start", json!({ "id": "T001" }), sctx.clone()).await);
    unwrap_ok(dispatcher.dispatch_wire("tasks.start", json!({ "id": "T002" }), sctx.clone()).await);

    let t1_after: Task = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("tasks.show", json!({ "id": "T001" }), sctx.clone()).await,
    ))
    .unwrap();
    let t2_after: Task = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("tasks.show", json!({ "id": "T002" }), sctx.clone()).await,
    ))
    .unwrap();
    assert_eq!(t1_after.status, TaskStatus::Pending);
    assert_eq!(t2_after.status, TaskStatus::Active);

    let status: Option<Session> = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("session.status", json!({}), sctx.clone()).await,
    ))
    .unwrap();
    assert_eq!(status.unwrap().task_work.map(|w| w.task_id), Some(TaskId::new(2)));

    let audit = unwrap_ok(
        dispatcher
            .dispatch_wire("admin.audit", json!({ "session_id": session.id }), sctx.clone())
            .await,
    );
    let audit: Vec<AuditLogEntry> = serde_json::from_value(audit).unwrap();
    assert!(audit
        .iter()
        .any(|a| a.operation == "tasks.start" && a.entity_id == "T002" && a.outcome == AuditOutcome::Success));
}

#[tokio::test]
async fn s3_gate_cascade_resets_downstream_and_logs_failure() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_title("implement widget")
        .with_description("ship the widget end to end")
        .with_gate(GateName::Implemented, Some(true))
        .with_gate(GateName::TestsPassed, Some(true))
        .with_gate(GateName::QaPassed, Some(true))
        .build();
    assert_eq!(task.verification.gate(GateName::CleanupDone), None);
    let agents = vec![
        AgentProfile { name: "author".into(), display_name: "Author".into(), capabilities: vec![], last_heartbeat: None },
        AgentProfile { name: "reviewer".into(), display_name: "Reviewer".into(), capabilities: vec![], last_heartbeat: None },
    ];
    let (dispatcher, _store, _dir) = setup(MockStore::with_tasks(vec![task]).with_agents(agents));

    let updated = unwrap_ok(
        dispatcher
            .dispatch_wire(
                "tasks.gate.set",
                json!({ "id": "T001", "gate": "qa_passed", "value": false, "agent": "reviewer" }),
                ctx(),
            )
            .await,
    );
    let updated: Task = serde_json::from_value(updated).unwrap();
    assert_eq!(updated.verification.gate(GateName::QaPassed), Some(false));
    assert_eq!(updated.verification.gate(GateName::CleanupDone), None);
    assert_eq!(updated.verification.gate(GateName::SecurityPassed), None);
    assert_eq!(updated.verification.gate(GateName::Documented), None);
    assert_eq!(updated.verification.failure_log.len(), 1);
    assert_eq!(updated.verification.failure_log[0].gate, GateName::QaPassed);
    assert_eq!(updated.verification.failure_log[0].agent, "reviewer");

    let self_approval = unwrap_err(
        dispatcher
            .dispatch_wire("tasks.gate.set", json!({ "id": "T001", "gate": "qa_passed", "value": true, "agent": "author" }), ctx())
            .await,
    );
    assert_eq!(self_approval.code, "E_CIRCULAR_VALIDATION");

    let not_whitelisted = unwrap_err(
        dispatcher
            .dispatch_wire("tasks.gate.set", json!({ "id": "T001", "gate": "qa_passed", "value": true, "agent": "stranger" }), ctx())
            .await,
    );
    assert_eq!(not_whitelisted.code, "E_AGENT_NOT_WHITELISTED");
}

#[tokio::test]
async fn s4_adr_human_in_the_loop_gate() {
    let (dispatcher, store, _dir) = setup(MockStore::new());

    let epic = unwrap_ok(
        dispatcher
            .dispatch_wire("tasks.add", json!({ "title": "roll out widget v2", "description": "epic tracking widget v2", "task_type": "epic" }), ctx())
            .await,
    );
    let epic: Task = serde_json::from_value(epic).unwrap();

    for stage in ["research", "consensus"] {
        unwrap_ok(
            dispatcher
                .dispatch_wire(
                    "pipeline.stage.record",
                    json!({ "epic_id": epic.id.to_string(), "stage": stage, "status": "skipped", "note": "not needed for this epic" }),
                    ctx(),
                )
                .await,
        );
    }

    // A decision backed by a completed consensus artifact is the `adr` gate's prerequisite.
    let consensus_decision = store
        .create_decision(Decision {
            id: 0,
            status: DecisionStatus::Proposed,
            consensus_manifest_id: Some(1),
            supersedes_id: None,
            superseded_by_id: None,
            content: "use approach B".into(),
            context: "".into(),
            rationale: "".into(),
            consequences_json: None,
            accepted_by: None,
            accepted_at: None,
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    let _ = consensus_decision;

    unwrap_ok(
        dispatcher
            .dispatch_wire("pipeline.stage.record", json!({ "epic_id": epic.id.to_string(), "stage": "adr", "status": "active" }), ctx())
            .await,
    );
    unwrap_ok(
        dispatcher
            .dispatch_wire(
                "pipeline.stage.record",
                json!({ "epic_id": epic.id.to_string(), "stage": "adr", "status": "completed", "note": "decided" }),
                ctx(),
            )
            .await,
    );

    let proposed = unwrap_ok(
        dispatcher
            .dispatch_wire(
                "pipeline.decision.propose",
                json!({ "content": "adopt approach B", "context": "widget v2", "rationale": "simplicity" }),
                ctx(),
            )
            .await,
    );
    let proposed: Decision = serde_json::from_value(proposed).unwrap();
    assert_eq!(proposed.status, DecisionStatus::Proposed);

    let blocked = unwrap_err(
        dispatcher
            .dispatch_wire(
                "pipeline.stage.record",
                json!({ "epic_id": epic.id.to_string(), "stage": "specification", "status": "active" }),
                ctx(),
            )
            .await,
    );
    assert_eq!(blocked.code, "E_HANDOFF_REQUIRED");
    assert_eq!(blocked.exit_code, 65);

    let accepted = unwrap_ok(
        dispatcher
            .dispatch_wire(
                "pipeline.decision.accept",
                json!({ "decision_id": proposed.id, "accepted_by": "alice" }),
                ctx(),
            )
            .await,
    );
    let accepted: Decision = serde_json::from_value(accepted).unwrap();
    assert_eq!(accepted.status, DecisionStatus::Accepted);
    assert_eq!(accepted.accepted_by.as_deref(), Some("alice"));

    let specification = unwrap_ok(
        dispatcher
            .dispatch_wire(
                "pipeline.stage.record",
                json!({ "epic_id": epic.id.to_string(), "stage": "specification", "status": "active" }),
                ctx(),
            )
            .await,
    );
    let specification: LifecycleStage = serde_json::from_value(specification).unwrap();
    assert_eq!(specification.status, StageStatus::Active);
    assert!(specification.output_file.is_some());
}

#[tokio::test]
async fn s5_supersession_cascade_flags_needs_review_and_blocks_active_stage() {
    let (dispatcher, store, _dir) = setup(MockStore::new());

    let t10 = unwrap_ok(dispatcher.dispatch_wire("tasks.add", json!({ "title": "build endpoint", "description": "wire the REST endpoint" }), ctx()).await);
    let t10: Task = serde_json::from_value(t10).unwrap();
    let t11 = unwrap_ok(dispatcher.dispatch_wire("tasks.add", json!({ "title": "build client", "description": "wire the client SDK" }), ctx()).await);
    let t11: Task = serde_json::from_value(t11).unwrap();

    for stage in ["research", "consensus", "adr", "specification", "decomposition"] {
        unwrap_ok(
            dispatcher
                .dispatch_wire(
                    "pipeline.stage.record",
                    json!({ "epic_id": t10.id.to_string(), "stage": stage, "status": "skipped", "note": "fast-tracked" }),
                    ctx(),
                )
                .await,
        );
    }
    unwrap_ok(
        dispatcher
            .dispatch_wire("pipeline.stage.record", json!({ "epic_id": t10.id.to_string(), "stage": "implementation", "status": "active" }), ctx())
            .await,
    );

    let d1 = unwrap_ok(
        dispatcher
            .dispatch_wire(
                "pipeline.decision.propose",
                json!({ "content": "use REST over gRPC", "context": "endpoint", "rationale": "fewer moving parts" }),
                ctx(),
            )
            .await,
    );
    let d1: Decision = serde_json::from_value(d1).unwrap();
    unwrap_ok(
        dispatcher
            .dispatch_wire("pipeline.decision.accept", json!({ "decision_id": d1.id, "accepted_by": "carol" }), ctx())
            .await,
    );

    store
        .link_task_decision(TaskDecision { task_id: t10.id, decision_id: d1.id, relationship: DecisionRelationship::Implements, needs_review: false })
        .await
        .unwrap();
    store
        .link_task_decision(TaskDecision { task_id: t11.id, decision_id: d1.id, relationship: DecisionRelationship::Implements, needs_review: false })
        .await
        .unwrap();

    let d2 = unwrap_ok(
        dispatcher
            .dispatch_wire(
                "pipeline.decision.propose",
                json!({ "content": "use gRPC instead", "context": "endpoint", "rationale": "org standard shifted" }),
                ctx(),
            )
            .await,
    );
    let d2: Decision = serde_json::from_value(d2).unwrap();

    unwrap_ok(
        dispatcher
            .dispatch_wire("pipeline.decision.supersede", json!({ "decision_id": d1.id, "by": d2.id }), ctx())
            .await,
    );

    let d1_after: Decision = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("pipeline.decision.show", json!({ "decision_id": d1.id }), ctx()).await,
    ))
    .unwrap();
    assert_eq!(d1_after.status, DecisionStatus::Superseded);
    assert_eq!(d1_after.superseded_by_id, Some(d2.id));

    let d2_after: Decision = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("pipeline.decision.show", json!({ "decision_id": d2.id }), ctx()).await,
    ))
    .unwrap();
    assert_eq!(d2_after.supersedes_id, Some(d1.id));

    let links = store.task_decisions_for(d1.id).await.unwrap();
    assert!(links.iter().all(|l| l.needs_review));
    assert_eq!(links.len(), 2);

    let pipeline = store.get_pipeline(t10.id).await.unwrap().unwrap();
    let stage = store.get_stage(pipeline.id, StageName::Implementation).await.unwrap().unwrap();
    assert_eq!(stage.status, StageStatus::Blocked);
    assert_eq!(stage.skip_reason.as_deref(), Some("governing ADR superseded"));
}

#[tokio::test]
async fn s6_session_chain_reciprocity_and_inline_debrief() {
    let (dispatcher, _store, _dir) = setup(MockStore::new());

    let started_a = unwrap_ok(dispatcher.dispatch_wire("session.start", json!({ "scope": "project:" }), ctx()).await);
    let session_a: Session = serde_json::from_value(started_a["session"].clone()).unwrap();
    assert!(started_a["previous_debrief"].is_null());

    unwrap_ok(dispatcher.dispatch_wire("session.end", json!({}), ctx_session(session_a.id)).await);
    let session_a_ended: Session = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("session.show", json!({ "id": session_a.id }), ctx()).await,
    ))
    .unwrap();
    assert_eq!(session_a_ended.status, SessionStatus::Ended);
    assert!(session_a_ended.handoff_json.is_some());
    assert!(session_a_ended.debrief_json.is_some());

    let started_b = unwrap_ok(dispatcher.dispatch_wire("session.start", json!({ "scope": "project:" }), ctx()).await);
    let session_b: Session = serde_json::from_value(started_b["session"].clone()).unwrap();
    assert_eq!(session_b.previous_session_id, Some(session_a.id));
    assert_eq!(started_b["previous_debrief"], session_a_ended.debrief_json.unwrap());

    let session_a_after: Session = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("session.show", json!({ "id": session_a.id }), ctx()).await,
    ))
    .unwrap();
    assert_eq!(session_a_after.next_session_id, Some(session_b.id));
    assert_eq!(session_a_after.handoff_consumed_by, Some(session_b.id));
    assert!(session_a_after.handoff_consumed_at.is_some());

    let chain: Vec<Session> = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("session.chain.show", json!({ "id": session_b.id }), ctx()).await,
    ))
    .unwrap();
    assert_eq!(chain.iter().map(|s| s.id).collect::<Vec<_>>(), vec![session_a.id, session_b.id]);
}

#[tokio::test]
async fn invariant_title_equal_to_description_is_rejected() {
    let (dispatcher, _store, _dir) = setup(MockStore::new());
    let err = unwrap_err(
        dispatcher
            .dispatch_wire("tasks.add", json!({ "title": "same text", "description": "same text" }), ctx())
            .await,
    );
    assert_eq!(err.code, "E_INVALID_INPUT");
}

#[tokio::test]
async fn invariant_done_status_always_sets_completed_at() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_title("finish report")
        .with_description("write up quarterly findings")
        .with_gate(GateName::Implemented, Some(true))
        .with_gate(GateName::TestsPassed, Some(true))
        .with_gate(GateName::QaPassed, Some(true))
        .with_gate(GateName::CleanupDone, Some(true))
        .with_gate(GateName::SecurityPassed, Some(true))
        .with_gate(GateName::Documented, Some(true))
        .build();
    let (dispatcher, _store, _dir) = setup(MockStore::with_tasks(vec![task]));

    let completed: Task = serde_json::from_value(unwrap_ok(
        dispatcher.dispatch_wire("tasks.complete", json!({ "id": "T001" }), ctx()).await,
    ))
    .unwrap();
    assert_eq!(completed.status, TaskStatus::Done);
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn invariant_dependency_cycle_is_reported_not_silently_dropped() {
    let t1 = TaskBuilder::new().with_id(1).with_depends(vec![TaskId::new(2)]).build();
    let t2 = TaskBuilder::new().with_id(2).with_depends(vec![TaskId::new(1)]).build();
    let (dispatcher, _store, _dir) = setup(MockStore::with_tasks(vec![t1, t2]));

    let err = unwrap_err(dispatcher.dispatch_wire("tasks.getExecutionWaves", json!({}), ctx()).await);
    assert_eq!(err.code, "E_VALIDATION");
}
