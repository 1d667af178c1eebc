//! The session engine: scope verification, the session lifecycle state
//! machine, chained handoff/debrief computation, briefing, and the
//! context-budget ledger (§4.4).

use std::sync::Arc;

use chrono::Utc;
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use cleo_core::store::Store;

pub struct SessionEngine<S: Store> {
    store: Arc<S>,
}

/// What a task-graph mutation needs from the active session to enforce
/// scope (§4.4): out-of-scope writes fail with `E_TASK_NOT_IN_SCOPE`.
pub struct ScopeChecker<'a, S: Store> {
    store: &'a S,
    scope: SessionScope,
}

impl<'a, S: Store> ScopeChecker<'a, S> {
    pub async fn check(&self, task_id: TaskId) -> Result<()> {
        let in_scope = match self.scope.scope_type {
            ScopeType::Project => true,
            ScopeType::Task => self.scope.root_task_id == Some(task_id),
            ScopeType::Epic | ScopeType::Phase => {
                let Some(root) = self.scope.root_task_id else { return Ok(()) };
                if root == task_id {
                    true
                } else if self.scope.include_descendants {
                    self.is_descendant(root, task_id).await?
                } else {
                    false
                }
            }
        };
        if in_scope {
            Ok(())
        } else {
            Err(CleoError::TaskNotInScope(task_id.to_string()))
        }
    }

    async fn is_descendant(&self, root: TaskId, candidate: TaskId) -> Result<bool> {
        let mut cursor = self.store.get_task(candidate).await?;
        while let Some(task) = cursor {
            match task.parent_id {
                Some(parent) if parent == root => return Ok(true),
                Some(parent) => cursor = self.store.get_task(parent).await?,
                None => return Ok(false),
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Briefing {
    pub last_handoff: Option<serde_json::Value>,
    pub current_focus: Option<TaskWorkRef>,
    pub next_ready: Vec<TaskId>,
    pub open_bugs: Vec<TaskId>,
    pub blockers: Vec<TaskId>,
    pub active_epics: Vec<TaskId>,
}

impl<S: Store> SessionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn scope_checker(&self) -> Result<Option<ScopeChecker<'_, S>>> {
        let session = self.store.get_active_session().await?;
        Ok(session.map(|s| ScopeChecker {
            store: &*self.store,
            scope: s.scope,
        }))
    }

    /// `sessionStart`: refuses if another session is already active
    /// (single-writer invariant, `E_SESSION_EXISTS`), verifies the scope
    /// root exists, and links to the most recent ended session sharing the
    /// same scope (§4.4 chain linking).
    pub async fn start(&self, scope_spec: &str, agent_identifier: Option<String>, grade_mode: bool) -> Result<Session> {
        if self.store.get_active_session().await?.is_some() {
            return Err(CleoError::SessionExists);
        }
        let scope = SessionScope::parse(scope_spec).map_err(CleoError::invalid_input)?;
        if let Some(root) = scope.root_task_id {
            self.store
                .get_task(root)
                .await?
                .ok_or_else(|| CleoError::not_found(format!("task {root}")))?;
        }

        let predecessor = self.store.last_ended_session_with_scope(&scope).await?;

        let session = Session {
            id: 0,
            status: SessionStatus::Active,
            scope,
            task_work: None,
            started_at: Utc::now(),
            ended_at: None,
            suspended_at: None,
            suspend_count: 0,
            resume_count: 0,
            stats: SessionStats::default(),
            agent_identifier,
            previous_session_id: predecessor.as_ref().map(|p| p.id),
            next_session_id: None,
            handoff_json: None,
            debrief_json: None,
            handoff_consumed_at: None,
            handoff_consumed_by: None,
            grade_mode,
        };
        let created = self.store.create_session(session).await?;

        if let Some(mut prev) = predecessor {
            prev.next_session_id = Some(created.id);
            prev.handoff_consumed_at = Some(Utc::now());
            prev.handoff_consumed_by = Some(created.id);
            self.store.update_session(prev).await?;
        }

        Ok(created)
    }

    pub async fn end(&self) -> Result<Session> {
        let mut session = self.require_active().await?;
        let debrief = self.compute_debrief(&session).await?;
        session.debrief_json = Some(serde_json::to_value(&debrief).unwrap_or_default());
        session.handoff_json = Some(serde_json::to_value(debrief.to_handoff()).unwrap_or_default());
        session.status = SessionStatus::Ended;
        session.ended_at = Some(Utc::now());
        self.store.update_session(session).await
    }

    pub async fn suspend(&self) -> Result<Session> {
        let mut session = self.require_active().await?;
        session.status = SessionStatus::Suspended;
        session.suspended_at = Some(Utc::now());
        session.suspend_count += 1;
        self.store.update_session(session).await
    }

    pub async fn resume(&self, id: i64) -> Result<Session> {
        let mut session = self
            .store
            .get_session(id)
            .await?
            .ok_or(CleoError::SessionNotFound(id))?;
        if session.status != SessionStatus::Suspended {
            return Err(CleoError::invalid_input(format!("session {id} is not suspended")));
        }
        session.status = SessionStatus::Active;
        session.ended_at = None;
        session.resume_count += 1;
        self.store.update_session(session).await
    }

    async fn require_active(&self) -> Result<Session> {
        self.store
            .get_active_session()
            .await?
            .ok_or_else(|| CleoError::not_found("no active session"))
    }

    pub async fn status(&self) -> Result<Option<Session>> {
        self.store.get_active_session().await
    }

    pub async fn list(&self, status: Option<SessionStatus>) -> Result<Vec<Session>> {
        self.store
            .list_sessions(cleo_core::store::SessionFilter { status })
            .await
    }

    pub async fn show(&self, id: i64) -> Result<Session> {
        self.store.get_session(id).await?.ok_or(CleoError::SessionNotFound(id))
    }

    pub async fn chain_show(&self, id: i64) -> Result<Vec<Session>> {
        let mut chain = vec![self.show(id).await?];
        let mut cursor = chain[0].previous_session_id;
        let mut front = Vec::new();
        while let Some(prev_id) = cursor {
            let prev = self.show(prev_id).await?;
            cursor = prev.previous_session_id;
            front.push(prev);
        }
        front.reverse();
        front.append(&mut chain);
        Ok(front)
    }

    /// Pure function over session stats, audit log, and the graph: the
    /// shared computation behind `session.debrief.compute` and the
    /// `handoffJson` projection written on `sessionEnd` (§4.4).
    pub async fn compute_debrief(&self, session: &Session) -> Result<Debrief> {
        let audit = self.store.list_audit_for_session(session.id).await?;
        let touched: Vec<String> = audit.iter().map(|a| a.entity_id.clone()).collect();
        let all_tasks = self.store.list_tasks(TaskFilter::default()).await?;
        let blockers: Vec<TaskId> = all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .map(|t| t.id)
            .collect();
        let pending_decisions = self
            .store
            .list_decisions(cleo_core::store::DecisionFilter {
                status: Some(DecisionStatus::Proposed),
            })
            .await?
            .len();
        Ok(Debrief {
            session_id: session.id,
            stats: session.stats.clone(),
            tasks_touched: touched,
            blockers,
            pending_decisions,
            notes: None,
        })
    }

    pub async fn briefing(&self) -> Result<Briefing> {
        let session = self.store.get_active_session().await?;
        let all_tasks = self.store.list_tasks(TaskFilter::default()).await?;
        let next_ready: Vec<TaskId> = all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.depends.is_empty())
            .map(|t| t.id)
            .collect();
        let open_bugs: Vec<TaskId> = all_tasks
            .iter()
            .filter(|t| t.task_type == TaskType::Bug && !t.is_terminal())
            .map(|t| t.id)
            .collect();
        let blockers: Vec<TaskId> = all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .map(|t| t.id)
            .collect();
        let active_epics: Vec<TaskId> = all_tasks
            .iter()
            .filter(|t| t.is_epic() && t.epic_lifecycle == Some(EpicLifecycle::Active))
            .map(|t| t.id)
            .collect();
        Ok(Briefing {
            last_handoff: session.as_ref().and_then(|s| s.handoff_json.clone()),
            current_focus: session.and_then(|s| s.task_work),
            next_ready,
            open_bugs,
            blockers,
            active_epics,
        })
    }

    /// Context-budget status derived from the token-usage ledger
    /// (§4.4): thresholds live in `BudgetStatus::from_ratio`.
    pub async fn budget_status(&self, session_id: Option<i64>, ceiling: u64) -> Result<BudgetStatus> {
        let used = self.store.token_usage_total(session_id).await?;
        let ratio = if ceiling == 0 { 0.0 } else { used as f64 / ceiling as f64 };
        Ok(BudgetStatus::from_ratio(ratio))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Debrief {
    pub session_id: i64,
    pub stats: SessionStats,
    pub tasks_touched: Vec<String>,
    pub blockers: Vec<TaskId>,
    pub pending_decisions: usize,
    pub notes: Option<String>,
}

impl Debrief {
    /// The handoff is a stable minimal projection of the richer debrief
    /// (§4.4: "the debrief is authoritative; the handoff is a projection").
    pub fn to_handoff(&self) -> Handoff {
        Handoff {
            session_id: self.session_id,
            tasks_touched: self.tasks_touched.len(),
            blockers: self.blockers.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Handoff {
    pub session_id: i64,
    pub tasks_touched: usize,
    pub blockers: Vec<TaskId>,
}
