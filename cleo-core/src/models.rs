//! Domain models for the task graph, lifecycle pipeline, sessions, decisions,
//! document manifest, and observability ledgers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The ordered verification gates. Position in this array is the fixed
/// order used for downstream-reset semantics.
pub const GATE_ORDER: [GateName; 6] = [
    GateName::Implemented,
    GateName::TestsPassed,
    GateName::QaPassed,
    GateName::CleanupDone,
    GateName::SecurityPassed,
    GateName::Documented,
];

/// The ordered RCASD-ICR lifecycle stages.
pub const STAGE_ORDER: [StageName; 8] = [
    StageName::Research,
    StageName::Consensus,
    StageName::Adr,
    StageName::Specification,
    StageName::Decomposition,
    StageName::Implementation,
    StageName::Contribution,
    StageName::Release,
];

// ---------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Blocked,
    Done,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Epic,
    Task,
    Subtask,
    Bug,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Epic => "epic",
            TaskType::Task => "task",
            TaskType::Subtask => "subtask",
            TaskType::Bug => "bug",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicLifecycle {
    Active,
    Review,
    Done,
}

/// A task identifier, `T<sequence>`. Formatting and parsing live here so
/// every caller shares one canonical representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:03}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('T')
            .ok_or_else(|| format!("task id '{s}' must start with 'T'"))?;
        digits
            .parse::<u64>()
            .map(TaskId)
            .map_err(|_| format!("task id '{s}' has a non-numeric sequence"))
    }
}

impl TryFrom<String> for TaskId {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub task_type: TaskType,
    pub phase: Option<String>,
    pub parent_id: Option<TaskId>,
    pub depends: Vec<TaskId>,
    pub labels: Vec<String>,
    pub notes: Vec<String>,
    pub files: Vec<String>,
    pub acceptance: Vec<String>,
    pub size: Option<TaskSize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub blocked_by: Option<String>,
    pub verification: Verification,
    pub epic_lifecycle: Option<EpicLifecycle>,
    pub created_by: Option<String>,
}

impl Task {
    /// Whether this task may transition to `to` given its current status.
    /// Mirrors the task-graph engine's allowed-edges table (§4.2).
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self.status, to),
            (Pending, Active)
                | (Pending, Blocked)
                | (Pending, Cancelled)
                | (Active, Pending)
                | (Active, Blocked)
                | (Active, Done)
                | (Active, Cancelled)
                | (Blocked, Pending)
                | (Blocked, Active)
                | (Blocked, Cancelled)
                | (Cancelled, Pending) // uncancel
        )
    }

    pub fn is_epic(&self) -> bool {
        self.task_type == TaskType::Epic
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Option<TaskPriority>,
    pub task_type: Option<TaskType>,
    pub phase: Option<String>,
    pub parent_id: Option<TaskId>,
    pub depends: Vec<TaskId>,
    pub labels: Vec<String>,
    pub acceptance: Vec<String>,
    pub size: Option<TaskSize>,
    pub created_by: Option<String>,
}

/// Field updates for a task. `Option<Option<T>>` fields distinguish "leave
/// unchanged" (`None`) from "clear the value" (`Some(None)`), the same
/// pattern the grounding repository uses for nullable patch fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub phase: Option<Option<String>>,
    pub parent_id: Option<Option<TaskId>>,
    pub depends: Option<Vec<TaskId>>,
    pub labels: Option<Vec<String>>,
    pub notes: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub acceptance: Option<Vec<String>>,
    pub size: Option<Option<TaskSize>>,
    pub blocked_by: Option<Option<String>>,
    pub epic_lifecycle: Option<Option<EpicLifecycle>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<Vec<TaskStatus>>,
    pub priority: Option<Vec<TaskPriority>>,
    pub task_type: Option<Vec<TaskType>>,
    pub phase: Option<String>,
    pub parent_id: Option<TaskId>,
    pub label: Option<String>,
    pub include_archive: bool,
}

// ---------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateName {
    Implemented,
    TestsPassed,
    QaPassed,
    CleanupDone,
    SecurityPassed,
    Documented,
}

impl fmt::Display for GateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateName::Implemented => "implemented",
            GateName::TestsPassed => "testsPassed",
            GateName::QaPassed => "qaPassed",
            GateName::CleanupDone => "cleanupDone",
            GateName::SecurityPassed => "securityPassed",
            GateName::Documented => "documented",
        };
        write!(f, "{s}")
    }
}

/// A tri-valued gate: untouched, passed, or failed.
pub type GateValue = Option<bool>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureLogEntry {
    pub gate: GateName,
    pub agent: String,
    pub round: u32,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub gates: HashMap<GateName, GateValue>,
    pub round: u32,
    pub last_agent: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub failure_log: Vec<FailureLogEntry>,
}

impl Default for Verification {
    fn default() -> Self {
        let gates = GATE_ORDER.iter().map(|g| (*g, None)).collect();
        Self {
            gates,
            round: 0,
            last_agent: None,
            last_updated: None,
            failure_log: Vec::new(),
        }
    }
}

impl Verification {
    pub fn gate(&self, name: GateName) -> GateValue {
        self.gates.get(&name).copied().flatten()
    }

    /// True when every gate in `required` is `Some(true)`.
    pub fn passed(&self, required: &[GateName]) -> bool {
        required.iter().all(|g| self.gate(*g) == Some(true))
    }

    /// Reset every gate strictly after `from` in the fixed order to
    /// untouched. Invariant 12 (§8).
    pub fn reset_downstream_of(&mut self, from: GateName) {
        let idx = GATE_ORDER.iter().position(|g| *g == from).unwrap_or(0);
        for gate in &GATE_ORDER[idx + 1..] {
            self.gates.insert(*gate, None);
        }
    }
}

// ---------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Suspended,
    Ended,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Task,
    Epic,
    Phase,
    Project,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeType::Task => "task",
            ScopeType::Epic => "epic",
            ScopeType::Phase => "phase",
            ScopeType::Project => "project",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionScope {
    pub scope_type: ScopeType,
    pub root_task_id: Option<TaskId>,
    pub include_descendants: bool,
}

impl SessionScope {
    /// Parse a `{type}:{rootTaskId}` scope specifier (§4.4).
    pub fn parse(spec: &str) -> Result<Self, String> {
        let (kind, root) = spec
            .split_once(':')
            .ok_or_else(|| format!("scope '{spec}' must be '{{type}}:{{rootTaskId}}'"))?;
        let scope_type = match kind {
            "task" => ScopeType::Task,
            "epic" => ScopeType::Epic,
            "phase" => ScopeType::Phase,
            "project" => ScopeType::Project,
            other => return Err(format!("unknown scope type '{other}'")),
        };
        let root_task_id = if root.is_empty() || scope_type == ScopeType::Project {
            None
        } else {
            Some(root.parse::<TaskId>()?)
        };
        Ok(Self {
            scope_type,
            root_task_id,
            include_descendants: true,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub tasks_touched: u32,
    pub tasks_completed: u32,
    pub mutations: u32,
    pub queries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWorkRef {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub status: SessionStatus,
    pub scope: SessionScope,
    pub task_work: Option<TaskWorkRef>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspend_count: u32,
    pub resume_count: u32,
    pub stats: SessionStats,
    pub agent_identifier: Option<String>,
    pub previous_session_id: Option<i64>,
    pub next_session_id: Option<i64>,
    pub handoff_json: Option<serde_json::Value>,
    pub debrief_json: Option<serde_json::Value>,
    pub handoff_consumed_at: Option<DateTime<Utc>>,
    pub handoff_consumed_by: Option<i64>,
    pub grade_mode: bool,
}

/// Context-budget status derived from a token-usage ledger (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Caution,
    Critical,
    Emergency,
}

impl BudgetStatus {
    /// Thresholds are 70/85/90/95% of the configured ceiling (§4.4).
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.95 {
            BudgetStatus::Emergency
        } else if ratio >= 0.90 {
            BudgetStatus::Critical
        } else if ratio >= 0.85 {
            BudgetStatus::Caution
        } else if ratio >= 0.70 {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }
}

// ---------------------------------------------------------------------
// Lifecycle pipeline (RCASD-ICR)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Active,
    Completed,
    Blocked,
    Failed,
    Cancelled,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Research,
    Consensus,
    Adr,
    Specification,
    Decomposition,
    Implementation,
    Contribution,
    Release,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageName::Research => "research",
            StageName::Consensus => "consensus",
            StageName::Adr => "adr",
            StageName::Specification => "specification",
            StageName::Decomposition => "decomposition",
            StageName::Implementation => "implementation",
            StageName::Contribution => "contribution",
            StageName::Release => "release",
        };
        write!(f, "{s}")
    }
}

impl StageName {
    pub fn index(&self) -> usize {
        STAGE_ORDER.iter().position(|s| s == self).expect("closed enum")
    }

    pub fn predecessors(&self) -> &'static [StageName] {
        &STAGE_ORDER[..self.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Blocked,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleStage {
    pub id: i64,
    pub pipeline_id: i64,
    pub stage_name: StageName,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub skip_reason: Option<String>,
    pub notes_json: Option<serde_json::Value>,
    pub metadata_json: Option<serde_json::Value>,
    pub output_file: Option<String>,
    pub provenance_chain_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePipeline {
    pub id: i64,
    pub epic_id: TaskId,
    pub status: PipelineStatus,
    pub current_stage_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionType {
    Auto,
    Manual,
    GatePass,
    GateFail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub id: i64,
    pub pipeline_id: i64,
    pub from_stage_id: Option<i64>,
    pub to_stage_id: i64,
    pub transition_type: TransitionType,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateEnforcement {
    Strict,
    Advisory,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateCheckResult {
    Pass,
    Fail,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleGateResult {
    pub id: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub result: GateCheckResult,
    pub enforcement_mode: GateEnforcement,
    pub reason: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    File,
    Url,
    Manifest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvidence {
    pub id: i64,
    pub stage_id: i64,
    pub evidence_type: EvidenceType,
    pub uri: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Decision record (ADR)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Proposed,
    Accepted,
    Superseded,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub status: DecisionStatus,
    pub consensus_manifest_id: Option<i64>,
    pub supersedes_id: Option<i64>,
    pub superseded_by_id: Option<i64>,
    pub content: String,
    pub context: String,
    pub rationale: String,
    pub consequences_json: Option<serde_json::Value>,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEvidenceType {
    Research,
    Consensus,
    Specification,
    Task,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvidence {
    pub id: i64,
    pub decision_id: i64,
    pub evidence_type: DecisionEvidenceType,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRelationship {
    Implements,
    References,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDecision {
    pub task_id: TaskId,
    pub decision_id: i64,
    pub relationship: DecisionRelationship,
    pub needs_review: bool,
}

// ---------------------------------------------------------------------
// Document manifest
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAgentType {
    Research,
    Analysis,
    Specification,
    Decision,
    Implementation,
    Contribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentManifestEntry {
    pub id: i64,
    pub file_path: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub status: String,
    pub agent_type: ArtifactAgentType,
    pub topics_json: Vec<String>,
    pub key_findings_json: Vec<String>,
    pub actionable: bool,
    pub needs_followup_json: Vec<String>,
    pub linked_tasks_json: Vec<TaskId>,
}

// ---------------------------------------------------------------------
// Observability: audit log, compliance, token usage, work sessions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub operation: String,
    pub entity_type: String,
    pub entity_id: String,
    pub session_id: Option<i64>,
    pub agent_id: Option<String>,
    pub params_digest: String,
    pub outcome: AuditOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolViolation {
    pub requirement: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub manifest_id: Option<i64>,
    pub score: f64,
    pub violations: Vec<ProtocolViolation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageEvent {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_id: Option<i64>,
    pub tokens: u64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: i64,
    pub task_id: TaskId,
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub productivity_score: Option<f64>,
}

// ---------------------------------------------------------------------
// Agent registry
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub display_name: String,
    pub capabilities: Vec<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------
// Sequence record (`.sequence.json` sidecar, §6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub counter: u64,
    pub last_id: Option<TaskId>,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_round_trips() {
        let id = TaskId::new(42);
        assert_eq!(id.to_string(), "T042");
        assert_eq!("T042".parse::<TaskId>().unwrap(), id);
    }

    #[test]
    fn task_id_rejects_malformed_input() {
        assert!("X042".parse::<TaskId>().is_err());
        assert!("Tabc".parse::<TaskId>().is_err());
    }

    #[test]
    fn gate_reset_clears_downstream_only() {
        let mut v = Verification::default();
        v.gates.insert(GateName::Implemented, Some(true));
        v.gates.insert(GateName::TestsPassed, Some(true));
        v.gates.insert(GateName::QaPassed, Some(false));
        v.reset_downstream_of(GateName::QaPassed);
        assert_eq!(v.gate(GateName::Implemented), Some(true));
        assert_eq!(v.gate(GateName::TestsPassed), Some(true));
        assert_eq!(v.gate(GateName::CleanupDone), None);
        assert_eq!(v.gate(GateName::SecurityPassed), None);
        assert_eq!(v.gate(GateName::Documented), None);
    }

    #[test]
    fn task_status_transitions_match_allowed_edges() {
        let mut task = sample_task();
        assert!(task.can_transition_to(TaskStatus::Active));
        task.status = TaskStatus::Done;
        assert!(!task.can_transition_to(TaskStatus::Active));
    }

    #[test]
    fn budget_status_thresholds() {
        assert_eq!(BudgetStatus::from_ratio(0.10), BudgetStatus::Ok);
        assert_eq!(BudgetStatus::from_ratio(0.70), BudgetStatus::Warning);
        assert_eq!(BudgetStatus::from_ratio(0.85), BudgetStatus::Caution);
        assert_eq!(BudgetStatus::from_ratio(0.90), BudgetStatus::Critical);
        assert_eq!(BudgetStatus::from_ratio(0.95), BudgetStatus::Emergency);
    }

    fn sample_task() -> Task {
        Task {
            id: TaskId::new(1),
            title: "Build the thing".into(),
            description: "Because the thing needs building".into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            task_type: TaskType::Task,
            phase: None,
            parent_id: None,
            depends: Vec::new(),
            labels: Vec::new(),
            notes: Vec::new(),
            files: Vec::new(),
            acceptance: Vec::new(),
            size: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
            blocked_by: None,
            verification: Verification::default(),
            epic_lifecycle: None,
            created_by: None,
        }
    }
}
