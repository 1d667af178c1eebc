//! The lifecycle engine: the per-epic RCASD-ICR pipeline state machine,
//! its gate predicates, and the ADR decision record with its HITL gate and
//! supersession cascade (§4.3).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use cleo_core::error::{CleoError, Result};
use cleo_core::models::*;
use cleo_core::store::Store;
use tokio::io::AsyncWriteExt;

pub struct LifecycleEngine<S: Store> {
    store: Arc<S>,
    /// Root of `.cleo/` where `rcasd/<epicId>/<stage>/...` artifacts land.
    artifact_root: PathBuf,
    enforcement: GateEnforcement,
}

impl<S: Store> LifecycleEngine<S> {
    pub fn new(store: Arc<S>, artifact_root: PathBuf, enforcement: GateEnforcement) -> Self {
        Self {
            store,
            artifact_root,
            enforcement,
        }
    }

    /// To move `stage` out of `pending`, every predecessor stage must be
    /// `completed` or `skipped` (§4.3 gate predicates).
    pub async fn can_activate(&self, pipeline_id: i64, stage: StageName) -> Result<bool> {
        for predecessor in stage.predecessors() {
            let row = self.store.get_stage(pipeline_id, *predecessor).await?;
            match row {
                Some(s) if matches!(s.status, StageStatus::Completed | StageStatus::Skipped) => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Additional HITL gates beyond ordering: `adr` needs a consensus
    /// decision on file; `specification` needs that decision `accepted`.
    async fn extra_gate(&self, epic_id: TaskId, stage: StageName) -> Result<Option<CleoError>> {
        match stage {
            StageName::Adr => {
                let decisions = self.store.list_decisions(Default::default()).await?;
                let has_consensus = decisions.iter().any(|d| d.consensus_manifest_id.is_some());
                if !has_consensus {
                    return Ok(Some(CleoError::GateFailed(format!(
                        "epic {epic_id}: adr stage requires a decision linked to a completed consensus artifact"
                    ))));
                }
                Ok(None)
            }
            StageName::Specification => {
                let decisions = self.store.list_decisions(Default::default()).await?;
                let accepted = decisions.iter().any(|d| d.status == DecisionStatus::Accepted);
                if !accepted {
                    return Ok(Some(CleoError::HandoffRequired));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// `recordStageProgress`: the single mutate entry point for lifecycle
    /// stage state. Scaffolds the markdown artifact, upserts the stage row,
    /// appends a transition and an evidence row (§4.3 a-d).
    pub async fn record_stage_progress(
        &self,
        epic_id: TaskId,
        stage: StageName,
        status: StageStatus,
        note: Option<String>,
    ) -> Result<LifecycleStage> {
        let pipeline = self.store.get_or_create_pipeline(epic_id).await?;

        if status == StageStatus::Active && !self.can_activate(pipeline.id, stage).await? {
            return Err(CleoError::GateFailed(format!(
                "epic {epic_id}: stage {stage} has incomplete prerequisites"
            )));
        }
        if status == StageStatus::Skipped && note.is_none() {
            return Err(CleoError::invalid_input("skipping a stage requires a skipReason"));
        }
        if status == StageStatus::Active {
            if let Some(err) = self.extra_gate(epic_id, stage).await? {
                self.store
                    .append_gate_result(LifecycleGateResult {
                        id: 0,
                        pipeline_id: pipeline.id,
                        stage_id: 0,
                        result: GateCheckResult::Fail,
                        enforcement_mode: self.enforcement,
                        reason: Some(err.to_string()),
                        checked_at: Utc::now(),
                    })
                    .await?;
                if self.enforcement == GateEnforcement::Strict {
                    return Err(err);
                }
            }
        }

        let existing = self.store.get_stage(pipeline.id, stage).await?;
        let now = Utc::now();
        let output_file = self.scaffold_artifact(epic_id, stage, &status, note.as_deref()).await?;

        let stage_row = LifecycleStage {
            id: existing.as_ref().map(|s| s.id).unwrap_or(0),
            pipeline_id: pipeline.id,
            stage_name: stage,
            status,
            started_at: existing
                .as_ref()
                .and_then(|s| s.started_at)
                .or(if status == StageStatus::Active { Some(now) } else { None }),
            completed_at: if status == StageStatus::Completed { Some(now) } else { None },
            skip_reason: if status == StageStatus::Skipped { note.clone() } else { None },
            notes_json: note.as_ref().map(|n| serde_json::json!({ "note": n })),
            metadata_json: None,
            output_file: Some(output_file.clone()),
            provenance_chain_json: Some(serde_json::json!(self.provenance_chain(stage))),
        };
        let saved = self.store.upsert_stage(stage_row).await?;

        self.store
            .append_transition(LifecycleTransition {
                id: 0,
                pipeline_id: pipeline.id,
                from_stage_id: existing.map(|s| s.id),
                to_stage_id: saved.id,
                transition_type: TransitionType::Manual,
                at: now,
                note: note.clone(),
            })
            .await?;

        self.store
            .append_evidence(LifecycleEvidence {
                id: 0,
                stage_id: saved.id,
                evidence_type: EvidenceType::File,
                uri: output_file,
                recorded_at: now,
            })
            .await?;

        if stage == StageName::Adr && status == StageStatus::Completed {
            self.sync_adr(epic_id, &note).await?;
        }

        Ok(saved)
    }

    fn provenance_chain(&self, stage: StageName) -> Vec<String> {
        stage.predecessors().iter().map(|s| s.to_string()).collect()
    }

    async fn scaffold_artifact(
        &self,
        epic_id: TaskId,
        stage: StageName,
        status: &StageStatus,
        note: Option<&str>,
    ) -> Result<String> {
        let dir = self.artifact_root.join("rcasd").join(epic_id.to_string()).join(stage.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CleoError::ArtifactWrite(e.to_string()))?;
        let file_name = format!("{epic_id}-{stage}.md");
        let final_path = dir.join(&file_name);
        let tmp_path = dir.join(format!(".{file_name}.tmp"));

        let status_str = status_label(status);
        let contents = format!(
            "---\ntaskId: {epic_id}\nstage: {stage}\nstatus: {status_str}\nbackLinks: {:?}\n---\n\n# {stage} — {epic_id}\n\n{}\n",
            self.provenance_chain(stage),
            note.unwrap_or(""),
        );

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| CleoError::ArtifactWrite(e.to_string()))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| CleoError::ArtifactWrite(e.to_string()))?;
        file.flush().await.map_err(|e| CleoError::ArtifactWrite(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| CleoError::ArtifactWrite(e.to_string()))?;

        Ok(final_path.to_string_lossy().into_owned())
    }

    async fn sync_adr(&self, _epic_id: TaskId, note: &Option<String>) -> Result<()> {
        let decision = Decision {
            id: 0,
            status: DecisionStatus::Proposed,
            consensus_manifest_id: None,
            supersedes_id: None,
            superseded_by_id: None,
            content: note.clone().unwrap_or_default(),
            context: String::new(),
            rationale: String::new(),
            consequences_json: None,
            accepted_by: None,
            accepted_at: None,
            created_at: Utc::now(),
        };
        self.store.create_decision(decision).await?;
        Ok(())
    }

    pub async fn decision_propose(&self, content: String, context: String, rationale: String) -> Result<Decision> {
        let decision = Decision {
            id: 0,
            status: DecisionStatus::Proposed,
            consensus_manifest_id: None,
            supersedes_id: None,
            superseded_by_id: None,
            content,
            context,
            rationale,
            consequences_json: None,
            accepted_by: None,
            accepted_at: None,
            created_at: Utc::now(),
        };
        self.store.create_decision(decision).await
    }

    /// Flips a proposed decision to accepted. Requires a non-empty
    /// `accepted_by` (§4.3 ADR HITL).
    pub async fn decision_accept(&self, decision_id: i64, accepted_by: String) -> Result<Decision> {
        if accepted_by.trim().is_empty() {
            return Err(CleoError::invalid_input("acceptedBy must be non-empty"));
        }
        let mut decision = self
            .store
            .get_decision(decision_id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("decision {decision_id}")))?;
        decision.status = DecisionStatus::Accepted;
        decision.accepted_by = Some(accepted_by);
        decision.accepted_at = Some(Utc::now());
        self.store.update_decision(decision).await
    }

    /// Supersession cascade (§4.3, invariant 11): flags downstream work for
    /// review and blocks active implementation/contribution stages. Never
    /// deletes anything.
    pub async fn decision_supersede(&self, decision_id: i64, by: i64) -> Result<()> {
        let mut old = self
            .store
            .get_decision(decision_id)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("decision {decision_id}")))?;
        let mut new = self
            .store
            .get_decision(by)
            .await?
            .ok_or_else(|| CleoError::not_found(format!("decision {by}")))?;

        old.status = DecisionStatus::Superseded;
        old.superseded_by_id = Some(by);
        new.supersedes_id = Some(decision_id);
        self.store.update_decision(old).await?;
        self.store.update_decision(new).await?;

        let links = self.store.task_decisions_for(decision_id).await?;
        for link in links.iter().filter(|l| l.relationship == DecisionRelationship::Implements) {
            self.store.flag_needs_review(link.task_id, decision_id).await?;
            if let Some(pipeline) = self.store.get_pipeline(link.task_id).await? {
                if let Some(stage) = self.store.get_stage(pipeline.id, StageName::Implementation).await? {
                    if stage.status == StageStatus::Active {
                        self.store
                            .upsert_stage(LifecycleStage {
                                status: StageStatus::Blocked,
                                skip_reason: Some("governing ADR superseded".to_string()),
                                ..stage
                            })
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn list_decisions(&self, status: Option<DecisionStatus>) -> Result<Vec<Decision>> {
        self.store.list_decisions(cleo_core::store::DecisionFilter { status }).await
    }

    pub async fn get_decision(&self, id: i64) -> Result<Decision> {
        self.store.get_decision(id).await?.ok_or_else(|| CleoError::not_found(format!("decision {id}")))
    }
}

fn status_label(status: &StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Active => "active",
        StageStatus::Blocked => "blocked",
        StageStatus::Completed => "completed",
        StageStatus::Skipped => "skipped",
    }
}
