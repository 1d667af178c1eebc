//! SQLite-backed implementation of `cleo_core::store::Store`.
//!
//! A single `SqlitePool` backs every accessor. Mutating calls additionally
//! take the in-process advisory lock (`tokio::sync::Mutex`) described in
//! spec.md §4.1 so that two mutations never interleave within one process;
//! cross-process exclusion is left to SQLite's own file locking.

use async_trait::async_trait;
use chrono::Utc;
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use cleo_core::store::{ArchiveSource, DecisionFilter, SessionFilter, Store, StoreStats};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::common::*;

/// Embeds and runs the forward-only migration set at startup.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Opens (creating if absent) the SQLite database at `url`, e.g.
    /// `sqlite://./.cleo/cleo.db` or `sqlite::memory:` for tests.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CleoError::Configuration(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(if url.contains(":memory:") { 1 } else { 8 })
            .connect_with(options)
            .await
            .map_err(sqlx_error_to_store_error)?;
        if !url.contains(":memory:") {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await
                .map_err(sqlx_error_to_store_error)?;
        }
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    #[cfg(test)]
    pub async fn connect_memory() -> Result<Self> {
        let store = Self::connect("sqlite::memory:").await?;
        store.migrate().await?;
        Ok(store)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| CleoError::Store(format!("migration failed: {e}")))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn schema_version(&self) -> Result<i64> {
        let row = sqlx::query("SELECT version FROM schema_meta")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(row.get("version"))
    }

    async fn next_task_id(&self) -> Result<TaskId> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_store_error)?;
        let row = sqlx::query("UPDATE sequence_record SET counter = counter + 1 WHERE id = 1 RETURNING counter")
            .fetch_one(&mut *tx)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let counter: i64 = row.get("counter");
        let id = TaskId::new(counter as u64);
        sqlx::query("UPDATE sequence_record SET last_id = ? WHERE id = 1")
            .bind(counter)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_store_error)?;
        tx.commit().await.map_err(sqlx_error_to_store_error)?;
        Ok(id)
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let id = {
            let row = sqlx::query("UPDATE sequence_record SET counter = counter + 1 WHERE id = 1 RETURNING counter")
                .fetch_one(&self.pool)
                .await
                .map_err(sqlx_error_to_store_error)?;
            TaskId::new(row.get::<i64, _>("counter") as u64)
        };
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
        self.insert_task(&task).await?;
        self.recompute_and_store_checksum().await?;
        Ok(task)
    }

    async fn update_task(&self, id: TaskId, updates: UpdateTask) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .fetch_task(id)
            .await?
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

        self.write_task(&task).await?;
        self.recompute_and_store_checksum().await?;
        Ok(task)
    }

    async fn set_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .fetch_task(id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        task.status = status;
        task.updated_at = Utc::now();
        match status {
            TaskStatus::Done => task.completed_at = Some(task.updated_at),
            TaskStatus::Cancelled => task.cancelled_at = Some(task.updated_at),
            _ => {}
        }
        self.write_task(&task).await?;
        self.recompute_and_store_checksum().await?;
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.fetch_task(id).await
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM tasks WHERE 1=1");
        if let Some(statuses) = &filter.status {
            qb.push(" AND status IN (");
            let mut sep = qb.separated(", ");
            for s in statuses {
                sep.push_bind(task_status_to_str(*s));
            }
            qb.push(")");
        }
        if let Some(priorities) = &filter.priority {
            qb.push(" AND priority IN (");
            let mut sep = qb.separated(", ");
            for p in priorities {
                sep.push_bind(task_priority_to_str(*p));
            }
            qb.push(")");
        }
        if let Some(types) = &filter.task_type {
            qb.push(" AND task_type IN (");
            let mut sep = qb.separated(", ");
            for t in types {
                sep.push_bind(task_type_to_str(*t));
            }
            qb.push(")");
        }
        if let Some(phase) = &filter.phase {
            qb.push(" AND phase = ").push_bind(phase.clone());
        }
        if let Some(parent_id) = filter.parent_id {
            qb.push(" AND parent_id = ").push_bind(parent_id.0 as i64);
        }
        if let Some(label) = &filter.label {
            qb.push(" AND labels_json LIKE ")
                .push_bind(format!("%\"{label}\"%"));
        }
        qb.push(" ORDER BY id ASC");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let children = sqlx::query("SELECT COUNT(*) as n FROM tasks WHERE parent_id = ?")
            .bind(id.0 as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        if children.get::<i64, _>("n") > 0 {
            return Err(CleoError::HasChildren(id.to_string()));
        }
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        self.recompute_and_store_checksum().await?;
        Ok(())
    }

    async fn archive_task(&self, id: TaskId, source: ArchiveSource) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let task = self
            .fetch_task(id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        let task_json = serde_json::to_string(&task).map_err(|e| CleoError::Store(e.to_string()))?;
        sqlx::query(
            "INSERT INTO archived_tasks (id, task_json, archive_source, archived_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.0 as i64)
        .bind(task_json)
        .bind(source.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        self.recompute_and_store_checksum().await?;
        Ok(())
    }

    async fn list_archived_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT task_json FROM archived_tasks ORDER BY archived_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        rows.iter()
            .map(|r| {
                let json: String = r.get("task_json");
                serde_json::from_str(&json).map_err(|e| CleoError::Store(e.to_string()))
            })
            .collect()
    }

    async fn update_verification(&self, id: TaskId, verification: Verification) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .fetch_task(id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("task {id}")))?;
        task.verification = verification;
        task.updated_at = Utc::now();
        self.write_task(&task).await?;
        self.recompute_and_store_checksum().await?;
        Ok(task)
    }

    async fn stored_checksum(&self) -> Result<String> {
        let row = sqlx::query("SELECT checksum FROM _meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(row.get("checksum"))
    }

    async fn recompute_and_store_checksum(&self) -> Result<String> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let tasks: Vec<Task> = rows.iter().map(row_to_task).collect::<Result<_>>()?;
        let checksum = cleo_core::validation::compute_checksum(&tasks);
        sqlx::query("UPDATE _meta SET checksum = ?, store_version = store_version + 1 WHERE id = 1")
            .bind(&checksum)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(checksum)
    }

    async fn sequence(&self) -> Result<SequenceRecord> {
        let row = sqlx::query("SELECT counter, last_id, checksum FROM sequence_record WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(SequenceRecord {
            counter: row.get::<i64, _>("counter") as u64,
            last_id: row
                .try_get::<Option<i64>, _>("last_id")
                .ok()
                .flatten()
                .map(|v| TaskId::new(v as u64)),
            checksum: row.get("checksum"),
        })
    }

    async fn create_session(&self, session: Session) -> Result<Session> {
        let _guard = self.write_lock.lock().await;
        let row = sqlx::query(
            "INSERT INTO sessions (status, scope_type, scope_root_task_id, scope_include_descendants,
                task_work_task_id, started_at, stats_json, agent_identifier, previous_session_id, grade_mode)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(session_status_to_str(session.status))
        .bind(scope_type_to_str(session.scope.scope_type))
        .bind(session.scope.root_task_id.map(|t| t.0 as i64))
        .bind(session.scope.include_descendants as i64)
        .bind(session.task_work.as_ref().map(|w| w.task_id.0 as i64))
        .bind(session.started_at)
        .bind(serde_json::to_string(&session.stats).unwrap_or_else(|_| "{}".into()))
        .bind(session.agent_identifier.clone())
        .bind(session.previous_session_id)
        .bind(session.grade_mode as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        let id: i64 = row.get("id");
        if let Some(prev) = session.previous_session_id {
            sqlx::query("UPDATE sessions SET next_session_id = ? WHERE id = ?")
                .bind(id)
                .bind(prev)
                .execute(&self.pool)
                .await
                .map_err(sqlx_error_to_store_error)?;
        }
        self.fetch_session(id)
            .await?
            .ok_or_else(|| CleoError::Store("session vanished after insert".into()))
    }

    async fn update_session(&self, session: Session) -> Result<Session> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE sessions SET status = ?, ended_at = ?, suspended_at = ?, suspend_count = ?,
                resume_count = ?, stats_json = ?, next_session_id = ?, handoff_json = ?, debrief_json = ?,
                handoff_consumed_at = ?, handoff_consumed_by = ?, task_work_task_id = ?
             WHERE id = ?",
        )
        .bind(session_status_to_str(session.status))
        .bind(session.ended_at)
        .bind(session.suspended_at)
        .bind(session.suspend_count as i64)
        .bind(session.resume_count as i64)
        .bind(serde_json::to_string(&session.stats).unwrap_or_else(|_| "{}".into()))
        .bind(session.next_session_id)
        .bind(session.handoff_json.as_ref().map(|v| v.to_string()))
        .bind(session.debrief_json.as_ref().map(|v| v.to_string()))
        .bind(session.handoff_consumed_at)
        .bind(session.handoff_consumed_by)
        .bind(session.task_work.as_ref().map(|w| w.task_id.0 as i64))
        .bind(session.id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        self.fetch_session(session.id)
            .await?
            .ok_or_else(|| CleoError::SessionNotFound(session.id))
    }

    async fn get_session(&self, id: i64) -> Result<Option<Session>> {
        self.fetch_session(id).await
    }

    async fn get_active_session(&self) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT id FROM sessions WHERE status = 'active' LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        match row {
            Some(r) => self.fetch_session(r.get("id")).await,
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM sessions WHERE 1=1");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(session_status_to_str(status));
        }
        qb.push(" ORDER BY started_at DESC");
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let mut sessions = Vec::with_capacity(rows.len());
        for r in rows {
            if let Some(s) = self.fetch_session(r.get("id")).await? {
                sessions.push(s);
            }
        }
        Ok(sessions)
    }

    async fn last_ended_session_with_scope(&self, scope: &SessionScope) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id FROM sessions WHERE status IN ('ended', 'archived') AND scope_type = ?
                AND (scope_root_task_id = ? OR (scope_root_task_id IS NULL AND ? IS NULL))
             ORDER BY ended_at DESC LIMIT 1",
        )
        .bind(scope_type_to_str(scope.scope_type))
        .bind(scope.root_task_id.map(|t| t.0 as i64))
        .bind(scope.root_task_id.map(|t| t.0 as i64))
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        match row {
            Some(r) => self.fetch_session(r.get("id")).await,
            None => Ok(None),
        }
    }

    async fn get_or_create_pipeline(&self, epic_id: TaskId) -> Result<LifecyclePipeline> {
        let _guard = self.write_lock.lock().await;
        if let Some(p) = self.fetch_pipeline(epic_id).await? {
            return Ok(p);
        }
        let row = sqlx::query(
            "INSERT INTO lifecycle_pipelines (epic_id, status) VALUES (?, 'active') RETURNING id",
        )
        .bind(epic_id.0 as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(LifecyclePipeline {
            id: row.get("id"),
            epic_id,
            status: PipelineStatus::Active,
            current_stage_id: None,
        })
    }

    async fn get_pipeline(&self, epic_id: TaskId) -> Result<Option<LifecyclePipeline>> {
        self.fetch_pipeline(epic_id).await
    }

    async fn update_pipeline_status(&self, pipeline_id: i64, status: PipelineStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE lifecycle_pipelines SET status = ? WHERE id = ?")
            .bind(pipeline_status_to_str(status))
            .bind(pipeline_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn get_stage(&self, pipeline_id: i64, stage: StageName) -> Result<Option<LifecycleStage>> {
        let row = sqlx::query("SELECT * FROM lifecycle_stages WHERE pipeline_id = ? AND stage_name = ?")
            .bind(pipeline_id)
            .bind(stage_name_to_str(stage))
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        row.as_ref().map(row_to_stage).transpose()
    }

    async fn list_stages(&self, pipeline_id: i64) -> Result<Vec<LifecycleStage>> {
        let rows = sqlx::query("SELECT * FROM lifecycle_stages WHERE pipeline_id = ?")
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let mut stages: Vec<LifecycleStage> = rows.iter().map(row_to_stage).collect::<Result<_>>()?;
        stages.sort_by_key(|s| s.stage_name.index());
        Ok(stages)
    }

    async fn upsert_stage(&self, stage: LifecycleStage) -> Result<LifecycleStage> {
        let _guard = self.write_lock.lock().await;
        let row = sqlx::query(
            "INSERT INTO lifecycle_stages
                (pipeline_id, stage_name, status, started_at, completed_at, skip_reason, notes_json, metadata_json, output_file, provenance_chain_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (pipeline_id, stage_name) DO UPDATE SET
                status = excluded.status, started_at = excluded.started_at, completed_at = excluded.completed_at,
                skip_reason = excluded.skip_reason, notes_json = excluded.notes_json, metadata_json = excluded.metadata_json,
                output_file = excluded.output_file, provenance_chain_json = excluded.provenance_chain_json
             RETURNING id",
        )
        .bind(stage.pipeline_id)
        .bind(stage_name_to_str(stage.stage_name))
        .bind(stage_status_to_str(stage.status))
        .bind(stage.started_at)
        .bind(stage.completed_at)
        .bind(stage.skip_reason.clone())
        .bind(stage.notes_json.as_ref().map(|v| v.to_string()))
        .bind(stage.metadata_json.as_ref().map(|v| v.to_string()))
        .bind(stage.output_file.clone())
        .bind(stage.provenance_chain_json.as_ref().map(|v| v.to_string()))
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(LifecycleStage { id: row.get("id"), ..stage })
    }

    async fn append_transition(&self, transition: LifecycleTransition) -> Result<LifecycleTransition> {
        let row = sqlx::query(
            "INSERT INTO lifecycle_transitions (pipeline_id, from_stage_id, to_stage_id, transition_type, at, note)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(transition.pipeline_id)
        .bind(transition.from_stage_id)
        .bind(transition.to_stage_id)
        .bind(transition_type_str(transition.transition_type))
        .bind(transition.at)
        .bind(transition.note.clone())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(LifecycleTransition { id: row.get("id"), ..transition })
    }

    async fn append_gate_result(&self, result: LifecycleGateResult) -> Result<LifecycleGateResult> {
        let row = sqlx::query(
            "INSERT INTO lifecycle_gate_results (pipeline_id, stage_id, result, enforcement_mode, reason, checked_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(result.pipeline_id)
        .bind(result.stage_id)
        .bind(gate_check_result_str(result.result))
        .bind(gate_enforcement_str(result.enforcement_mode))
        .bind(result.reason.clone())
        .bind(result.checked_at)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(LifecycleGateResult { id: row.get("id"), ..result })
    }

    async fn append_evidence(&self, evidence: LifecycleEvidence) -> Result<LifecycleEvidence> {
        let row = sqlx::query(
            "INSERT INTO lifecycle_evidence (stage_id, evidence_type, uri, recorded_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(evidence.stage_id)
        .bind(evidence_type_str(evidence.evidence_type))
        .bind(evidence.uri.clone())
        .bind(evidence.recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(LifecycleEvidence { id: row.get("id"), ..evidence })
    }

    async fn create_decision(&self, decision: Decision) -> Result<Decision> {
        let _guard = self.write_lock.lock().await;
        let row = sqlx::query(
            "INSERT INTO decisions (status, consensus_manifest_id, supersedes_id, superseded_by_id,
                content, context, rationale, consequences_json, accepted_by, accepted_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(decision_status_to_str(decision.status))
        .bind(decision.consensus_manifest_id)
        .bind(decision.supersedes_id)
        .bind(decision.superseded_by_id)
        .bind(decision.content.clone())
        .bind(decision.context.clone())
        .bind(decision.rationale.clone())
        .bind(decision.consequences_json.as_ref().map(|v| v.to_string()))
        .bind(decision.accepted_by.clone())
        .bind(decision.accepted_at)
        .bind(decision.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(Decision { id: row.get("id"), ..decision })
    }

    async fn get_decision(&self, id: i64) -> Result<Option<Decision>> {
        let row = sqlx::query("SELECT * FROM decisions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        row.as_ref().map(row_to_decision).transpose()
    }

    async fn update_decision(&self, decision: Decision) -> Result<Decision> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE decisions SET status = ?, supersedes_id = ?, superseded_by_id = ?, accepted_by = ?, accepted_at = ?
             WHERE id = ?",
        )
        .bind(decision_status_to_str(decision.status))
        .bind(decision.supersedes_id)
        .bind(decision.superseded_by_id)
        .bind(decision.accepted_by.clone())
        .bind(decision.accepted_at)
        .bind(decision.id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        self.get_decision(decision.id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("decision {}", decision.id)))
    }

    async fn list_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM decisions WHERE 1=1");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(decision_status_to_str(status));
        }
        qb.push(" ORDER BY created_at DESC");
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        rows.iter().map(row_to_decision).collect()
    }

    async fn append_decision_evidence(&self, evidence: DecisionEvidence) -> Result<DecisionEvidence> {
        let row = sqlx::query(
            "INSERT INTO decision_evidence (decision_id, evidence_type, reference) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(evidence.decision_id)
        .bind(decision_evidence_type_str(evidence.evidence_type))
        .bind(evidence.reference.clone())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(DecisionEvidence { id: row.get("id"), ..evidence })
    }

    async fn link_task_decision(&self, link: TaskDecision) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_decisions (task_id, decision_id, relationship, needs_review)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (task_id, decision_id) DO UPDATE SET relationship = excluded.relationship, needs_review = excluded.needs_review",
        )
        .bind(link.task_id.0 as i64)
        .bind(link.decision_id)
        .bind(decision_relationship_str(link.relationship))
        .bind(link.needs_review as i64)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn task_decisions_for(&self, decision_id: i64) -> Result<Vec<TaskDecision>> {
        let rows = sqlx::query("SELECT * FROM task_decisions WHERE decision_id = ?")
            .bind(decision_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        rows.iter()
            .map(|r| {
                Ok(TaskDecision {
                    task_id: TaskId::new(r.get::<i64, _>("task_id") as u64),
                    decision_id: r.get("decision_id"),
                    relationship: str_to_decision_relationship(&r.get::<String, _>("relationship"))?,
                    needs_review: r.get::<i64, _>("needs_review") != 0,
                })
            })
            .collect()
    }

    async fn flag_needs_review(&self, task_id: TaskId, decision_id: i64) -> Result<()> {
        sqlx::query("UPDATE task_decisions SET needs_review = 1 WHERE task_id = ? AND decision_id = ?")
            .bind(task_id.0 as i64)
            .bind(decision_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn append_manifest_entry(&self, entry: DocumentManifestEntry) -> Result<DocumentManifestEntry> {
        let row = sqlx::query(
            "INSERT INTO document_manifest
                (file_path, title, date, status, agent_type, topics_json, key_findings_json, actionable, needs_followup_json, linked_tasks_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entry.file_path.clone())
        .bind(entry.title.clone())
        .bind(entry.date)
        .bind(entry.status.clone())
        .bind(artifact_agent_type_str(entry.agent_type))
        .bind(strings_to_json(&entry.topics_json))
        .bind(strings_to_json(&entry.key_findings_json))
        .bind(entry.actionable as i64)
        .bind(strings_to_json(&entry.needs_followup_json))
        .bind(ids_to_json(&entry.linked_tasks_json))
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(DocumentManifestEntry { id: row.get("id"), ..entry })
    }

    async fn list_manifest(&self) -> Result<Vec<DocumentManifestEntry>> {
        let rows = sqlx::query("SELECT * FROM document_manifest ORDER BY date DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        rows.iter()
            .map(|r| {
                Ok(DocumentManifestEntry {
                    id: r.get("id"),
                    file_path: r.get("file_path"),
                    title: r.get("title"),
                    date: r.get("date"),
                    status: r.get("status"),
                    agent_type: str_to_artifact_agent_type(&r.get::<String, _>("agent_type"))?,
                    topics_json: json_to_strings(&r.get::<String, _>("topics_json")),
                    key_findings_json: json_to_strings(&r.get::<String, _>("key_findings_json")),
                    actionable: r.get::<i64, _>("actionable") != 0,
                    needs_followup_json: json_to_strings(&r.get::<String, _>("needs_followup_json")),
                    linked_tasks_json: json_to_ids(&r.get::<String, _>("linked_tasks_json")),
                })
            })
            .collect()
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> Result<AuditLogEntry> {
        let row = sqlx::query(
            "INSERT INTO audit_logs (created_at, operation, entity_type, entity_id, session_id, agent_id, params_digest, outcome)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entry.created_at)
        .bind(entry.operation.clone())
        .bind(entry.entity_type.clone())
        .bind(entry.entity_id.clone())
        .bind(entry.session_id)
        .bind(entry.agent_id.clone())
        .bind(entry.params_digest.clone())
        .bind(audit_outcome_to_str(entry.outcome))
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(AuditLogEntry { id: row.get("id"), ..entry })
    }

    async fn update_audit_outcome(&self, id: i64, outcome: AuditOutcome) -> Result<()> {
        sqlx::query("UPDATE audit_logs SET outcome = ? WHERE id = ?")
            .bind(audit_outcome_to_str(outcome))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn list_audit_for_session(&self, session_id: i64) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_logs WHERE session_id = ? ORDER BY created_at ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        rows.iter()
            .map(|r| {
                Ok(AuditLogEntry {
                    id: r.get("id"),
                    created_at: r.get("created_at"),
                    operation: r.get("operation"),
                    entity_type: r.get("entity_type"),
                    entity_id: r.get("entity_id"),
                    session_id: r.try_get("session_id").ok().flatten(),
                    agent_id: r.try_get("agent_id").ok().flatten(),
                    params_digest: r.get("params_digest"),
                    outcome: str_to_audit_outcome(&r.get::<String, _>("outcome"))?,
                })
            })
            .collect()
    }

    async fn append_compliance(&self, record: ComplianceRecord) -> Result<ComplianceRecord> {
        let violations_json = serde_json::to_string(&record.violations).unwrap_or_else(|_| "[]".into());
        let row = sqlx::query(
            "INSERT INTO compliance (created_at, task_id, manifest_id, score, violations_json)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(record.created_at)
        .bind(record.task_id.map(|t| t.0 as i64))
        .bind(record.manifest_id)
        .bind(record.score)
        .bind(violations_json)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(ComplianceRecord { id: row.get("id"), ..record })
    }

    async fn append_token_usage(&self, event: TokenUsageEvent) -> Result<TokenUsageEvent> {
        let row = sqlx::query(
            "INSERT INTO token_usage (created_at, session_id, tokens, source) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(event.created_at)
        .bind(event.session_id)
        .bind(event.tokens as i64)
        .bind(event.source.clone())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(TokenUsageEvent { id: row.get("id"), ..event })
    }

    async fn token_usage_total(&self, session_id: Option<i64>) -> Result<u64> {
        let row = if let Some(sid) = session_id {
            sqlx::query("SELECT COALESCE(SUM(tokens), 0) as total FROM token_usage WHERE session_id = ?")
                .bind(sid)
                .fetch_one(&self.pool)
                .await
        } else {
            sqlx::query("SELECT COALESCE(SUM(tokens), 0) as total FROM token_usage")
                .fetch_one(&self.pool)
                .await
        }
        .map_err(sqlx_error_to_store_error)?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    async fn start_work_session(&self, task_id: TaskId, agent_name: &str) -> Result<WorkSession> {
        let row = sqlx::query(
            "INSERT INTO work_sessions (task_id, agent_name, started_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(task_id.0 as i64)
        .bind(agent_name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(WorkSession {
            id: row.get("id"),
            task_id,
            agent_name: agent_name.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            notes: None,
            productivity_score: None,
        })
    }

    async fn end_work_session(&self, id: i64, notes: Option<String>, productivity_score: Option<f64>) -> Result<WorkSession> {
        sqlx::query("UPDATE work_sessions SET ended_at = ?, notes = ?, productivity_score = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(notes.clone())
            .bind(productivity_score)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let row = sqlx::query("SELECT * FROM work_sessions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(WorkSession {
            id: row.get("id"),
            task_id: TaskId::new(row.get::<i64, _>("task_id") as u64),
            agent_name: row.get("agent_name"),
            started_at: row.get("started_at"),
            ended_at: row.try_get("ended_at").ok().flatten(),
            notes: row.try_get("notes").ok().flatten(),
            productivity_score: row.try_get("productivity_score").ok().flatten(),
        })
    }

    async fn list_agents(&self) -> Result<Vec<AgentProfile>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(rows
            .iter()
            .map(|r| AgentProfile {
                name: r.get("name"),
                display_name: r.get("display_name"),
                capabilities: json_to_strings(&r.get::<String, _>("capabilities_json")),
                last_heartbeat: r.try_get("last_heartbeat").ok().flatten(),
            })
            .collect())
    }

    async fn agent_whitelist(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM agents ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let total_row = sqlx::query("SELECT COUNT(*) as n FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let by_status_rows = sqlx::query("SELECT status, COUNT(*) as n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        let tasks_by_status = by_status_rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n") as u64))
            .collect::<HashMap<_, _>>();
        Ok(StoreStats {
            total_tasks: total_row.get::<i64, _>("n") as u64,
            tasks_by_status,
            schema_version: self.schema_version().await?,
        })
    }
}

impl SqliteStore {
    async fn fetch_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks (id, title, description, status, priority, task_type, phase, parent_id,
                depends_json, labels_json, notes_json, files_json, acceptance_json, size, created_at, updated_at,
                completed_at, cancelled_at, blocked_by, epic_lifecycle, created_by,
                verification_gates_json, verification_round, verification_last_agent, verification_last_updated, verification_failure_log_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.0 as i64)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task_status_to_str(task.status))
        .bind(task_priority_to_str(task.priority))
        .bind(task_type_to_str(task.task_type))
        .bind(&task.phase)
        .bind(task.parent_id.map(|p| p.0 as i64))
        .bind(ids_to_json(&task.depends))
        .bind(strings_to_json(&task.labels))
        .bind(strings_to_json(&task.notes))
        .bind(strings_to_json(&task.files))
        .bind(strings_to_json(&task.acceptance))
        .bind(task.size.map(task_size_to_str))
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.completed_at)
        .bind(task.cancelled_at)
        .bind(&task.blocked_by)
        .bind(task.epic_lifecycle.map(epic_lifecycle_to_str))
        .bind(&task.created_by)
        .bind(gates_to_json(&task.verification.gates))
        .bind(task.verification.round as i64)
        .bind(&task.verification.last_agent)
        .bind(task.verification.last_updated)
        .bind(failure_log_to_json(&task.verification.failure_log))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn write_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?, task_type = ?, phase = ?,
                parent_id = ?, depends_json = ?, labels_json = ?, notes_json = ?, files_json = ?, acceptance_json = ?,
                size = ?, updated_at = ?, completed_at = ?, cancelled_at = ?, blocked_by = ?, epic_lifecycle = ?,
                verification_gates_json = ?, verification_round = ?, verification_last_agent = ?,
                verification_last_updated = ?, verification_failure_log_json = ?
             WHERE id = ?",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task_status_to_str(task.status))
        .bind(task_priority_to_str(task.priority))
        .bind(task_type_to_str(task.task_type))
        .bind(&task.phase)
        .bind(task.parent_id.map(|p| p.0 as i64))
        .bind(ids_to_json(&task.depends))
        .bind(strings_to_json(&task.labels))
        .bind(strings_to_json(&task.notes))
        .bind(strings_to_json(&task.files))
        .bind(strings_to_json(&task.acceptance))
        .bind(task.size.map(task_size_to_str))
        .bind(task.updated_at)
        .bind(task.completed_at)
        .bind(task.cancelled_at)
        .bind(&task.blocked_by)
        .bind(task.epic_lifecycle.map(epic_lifecycle_to_str))
        .bind(gates_to_json(&task.verification.gates))
        .bind(task.verification.round as i64)
        .bind(&task.verification.last_agent)
        .bind(task.verification.last_updated)
        .bind(failure_log_to_json(&task.verification.failure_log))
        .bind(task.id.0 as i64)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_store_error)?;
        Ok(())
    }

    async fn fetch_session(&self, id: i64) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn fetch_pipeline(&self, epic_id: TaskId) -> Result<Option<LifecyclePipeline>> {
        let row = sqlx::query("SELECT * FROM lifecycle_pipelines WHERE epic_id = ?")
            .bind(epic_id.0 as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_store_error)?;
        Ok(row.map(|r| LifecyclePipeline {
            id: r.get("id"),
            epic_id,
            status: str_to_pipeline_status(&r.get::<String, _>("status")).unwrap_or(PipelineStatus::Active),
            current_stage_id: r.try_get("current_stage_id").ok().flatten(),
        }))
    }
}

fn transition_type_str(t: TransitionType) -> &'static str {
    match t {
        TransitionType::Auto => "auto",
        TransitionType::Manual => "manual",
        TransitionType::GatePass => "gate-pass",
        TransitionType::GateFail => "gate-fail",
    }
}

fn gate_check_result_str(r: GateCheckResult) -> &'static str {
    match r {
        GateCheckResult::Pass => "pass",
        GateCheckResult::Fail => "fail",
        GateCheckResult::Warn => "warn",
    }
}

fn gate_enforcement_str(e: GateEnforcement) -> &'static str {
    match e {
        GateEnforcement::Strict => "strict",
        GateEnforcement::Advisory => "advisory",
        GateEnforcement::Off => "off",
    }
}

fn evidence_type_str(e: EvidenceType) -> &'static str {
    match e {
        EvidenceType::File => "file",
        EvidenceType::Url => "url",
        EvidenceType::Manifest => "manifest",
    }
}

fn decision_evidence_type_str(e: DecisionEvidenceType) -> &'static str {
    match e {
        DecisionEvidenceType::Research => "research",
        DecisionEvidenceType::Consensus => "consensus",
        DecisionEvidenceType::Specification => "specification",
        DecisionEvidenceType::Task => "task",
        DecisionEvidenceType::External => "external",
    }
}

fn decision_relationship_str(r: DecisionRelationship) -> &'static str {
    match r {
        DecisionRelationship::Implements => "implements",
        DecisionRelationship::References => "references",
    }
}

fn str_to_decision_relationship(s: &str) -> Result<DecisionRelationship> {
    match s {
        "implements" => Ok(DecisionRelationship::Implements),
        "references" => Ok(DecisionRelationship::References),
        other => Err(CleoError::Store(format!("invalid relationship: {other}"))),
    }
}

fn artifact_agent_type_str(t: ArtifactAgentType) -> &'static str {
    match t {
        ArtifactAgentType::Research => "research",
        ArtifactAgentType::Analysis => "analysis",
        ArtifactAgentType::Specification => "specification",
        ArtifactAgentType::Decision => "decision",
        ArtifactAgentType::Implementation => "implementation",
        ArtifactAgentType::Contribution => "contribution",
    }
}

fn str_to_artifact_agent_type(s: &str) -> Result<ArtifactAgentType> {
    match s {
        "research" => Ok(ArtifactAgentType::Research),
        "analysis" => Ok(ArtifactAgentType::Analysis),
        "specification" => Ok(ArtifactAgentType::Specification),
        "decision" => Ok(ArtifactAgentType::Decision),
        "implementation" => Ok(ArtifactAgentType::Implementation),
        "contribution" => Ok(ArtifactAgentType::Contribution),
        other => Err(CleoError::Store(format!("invalid agent type: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let task = store
            .create_task(NewTask {
                title: "Wire up the store".into(),
                description: "Implement the SQLite accessor".into(),
                task_type: Some(TaskType::Task),
                ..Default::default()
            })
            .await
            .unwrap();
        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Wire up the store");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn checksum_changes_after_mutation() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let before = store.stored_checksum().await.unwrap();
        store
            .create_task(NewTask {
                title: "A task".into(),
                description: "A description".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let after = store.stored_checksum().await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn delete_with_children_is_rejected() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let parent = store
            .create_task(NewTask {
                title: "Parent epic".into(),
                description: "Has children".into(),
                task_type: Some(TaskType::Epic),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_task(NewTask {
                title: "Child task".into(),
                description: "Under the epic".into(),
                parent_id: Some(parent.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = store.delete_task(parent.id).await.unwrap_err();
        assert!(matches!(err, CleoError::HasChildren(_)));
    }

    #[tokio::test]
    async fn gate_cascade_reset_persists() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let task = store
            .create_task(NewTask {
                title: "Gated task".into(),
                description: "Needs verification".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut verification = task.verification.clone();
        verification.gates.insert(GateName::Implemented, Some(true));
        verification.gates.insert(GateName::TestsPassed, Some(true));
        let updated = store.update_verification(task.id, verification).await.unwrap();
        assert_eq!(updated.verification.gate(GateName::TestsPassed), Some(true));
    }
}
