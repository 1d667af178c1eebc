//! Protocol compliance scoring and the `coherenceCheck` composite query
//! (§4.6, §8). Compliance checks a document-manifest entry against
//! per-artifact-type rules; coherence runs the universal invariant suite
//! plus store-level integrity checks in one report.

use std::sync::Arc;

use chrono::Utc;
use cleo_core::error::Result;
use cleo_core::models::*;
use cleo_core::store::Store;
use cleo_core::validation::{check_invariants, TaskSetView};

pub struct ComplianceEngine<S: Store> {
    store: Arc<S>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CoherenceReport {
    pub violations: Vec<cleo_core::error::RuleViolation>,
    pub checksum_ok: bool,
    pub duplicate_ids: Vec<TaskId>,
}

impl<S: Store> ComplianceEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Checks the §4.6 protocol-specific rules for a manifest entry and
    /// persists a `ComplianceRecord`.
    pub async fn check_manifest_entry(&self, entry: &DocumentManifestEntry) -> Result<ComplianceRecord> {
        let mut violations = Vec::new();

        match entry.agent_type {
            ArtifactAgentType::Research => {
                if !(3..=7).contains(&entry.key_findings_json.len()) {
                    violations.push(ProtocolViolation {
                        requirement: "research.key_findings_count".to_string(),
                        severity: ViolationSeverity::Error,
                        message: format!(
                            "research artifacts require 3-7 key findings, found {}",
                            entry.key_findings_json.len()
                        ),
                        fix: Some("add or trim keyFindings to land within 3-7 entries".to_string()),
                    });
                }
            }
            ArtifactAgentType::Decision => {
                let linked = !entry.linked_tasks_json.is_empty();
                if !linked {
                    violations.push(ProtocolViolation {
                        requirement: "decision.linked_consensus".to_string(),
                        severity: ViolationSeverity::Error,
                        message: "ADR artifacts require a linked consensus reference".to_string(),
                        fix: Some("link the consensus manifest entry before shipping the ADR".to_string()),
                    });
                }
                let decisions = self.store.list_decisions(Default::default()).await?;
                let accepted = decisions.iter().any(|d| d.status == DecisionStatus::Accepted);
                if !accepted {
                    violations.push(ProtocolViolation {
                        requirement: "decision.hitl_acceptance".to_string(),
                        severity: ViolationSeverity::Error,
                        message: "ADR artifacts require HITL acceptance before shipping".to_string(),
                        fix: Some("call pipeline.decision.accept with a non-empty acceptedBy".to_string()),
                    });
                }
            }
            _ => {}
        }

        let score = if violations.is_empty() {
            1.0
        } else {
            let errors = violations.iter().filter(|v| v.severity == ViolationSeverity::Error).count();
            (1.0 - (errors as f64 * 0.25)).max(0.0)
        };

        let record = ComplianceRecord {
            id: 0,
            created_at: Utc::now(),
            task_id: entry.linked_tasks_json.first().copied(),
            manifest_id: Some(entry.id),
            score,
            violations,
        };
        self.store.append_compliance(record).await
    }

    /// Runs the full §8 universal invariant suite plus checksum and
    /// duplicate-ID checks, returned as one unified report.
    pub async fn coherence_check(&self) -> Result<CoherenceReport> {
        let active = self.store.list_tasks(TaskFilter::default()).await?;
        let archived = self.store.list_archived_tasks().await?;
        let stored = self.store.stored_checksum().await?;

        let view = TaskSetView {
            active: &active,
            archived: &archived,
            stored_checksum: &stored,
        };
        // check_invariants already compares stored_checksum against a
        // freshly computed one (rule "checksum"), so this report's
        // checksum_ok mirrors that same rule rather than recomputing it.
        let violations = check_invariants(&view);
        let checksum_ok = !violations.iter().any(|v| v.rule == "checksum");

        let mut seen = std::collections::HashSet::new();
        let mut duplicate_ids = Vec::new();
        for t in active.iter().chain(archived.iter()) {
            if !seen.insert(t.id) {
                duplicate_ids.push(t.id);
            }
        }

        Ok(CoherenceReport {
            violations,
            checksum_ok,
            duplicate_ids,
        })
    }
}
