//! The closed error enumeration shared by every engine, the store, and the
//! dispatch layer. Handlers never throw across the dispatch boundary —
//! they return a `CleoError`, which carries its own exit code (§6, §7).

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CleoError>;

/// One violated rule, as surfaced by validation/coherence checks.
/// Violations are aggregated, never reported as first-failure-only.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{rule}: {message}")]
pub struct RuleViolation {
    pub rule: String,
    pub message: String,
}

impl RuleViolation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CleoError {
    // --- general / input (1-9) ---
    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("lock timeout waiting for in-flight mutation")]
    LockTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no handler registered for operation '{0}'")]
    NoHandler(String),

    // --- hierarchy / graph (10-19) ---
    #[error("validation failed: {0:?}")]
    Validation(Vec<RuleViolation>),

    #[error("task {0} has children; cascade explicitly or archive them first")]
    HasChildren(String),

    #[error("parent chain would exceed max depth or introduce a cycle")]
    CircularHierarchy,

    // --- concurrency (20-29) ---
    #[error("stored checksum does not match the computed checksum; run 'admin backup restore'")]
    ChecksumMismatch,

    #[error("task {0} is already claimed (active-task invariant)")]
    TaskClaimed(String),

    #[error("store version advanced during this mutation; retry")]
    ConcurrentModification,

    // --- session (30-39) ---
    #[error("a session is already active; end or suspend it first")]
    SessionExists,

    #[error("task {0} is not within the active session's scope")]
    TaskNotInScope(String),

    #[error("session {0} not found")]
    SessionNotFound(i64),

    // --- verification (40-49) ---
    #[error("gate cannot be set by the agent that created the task")]
    CircularValidation,

    #[error("agent '{0}' is not on the configured whitelist")]
    AgentNotWhitelisted(String),

    // --- protocol / HITL (60-67) ---
    #[error("human-in-the-loop acceptance required before this transition")]
    HandoffRequired,

    // --- lifecycle gate (80-84) ---
    #[error("lifecycle gate failed: {0}")]
    GateFailed(String),

    // --- artifact/provenance (85-94) ---
    #[error("artifact write failed: {0}")]
    ArtifactWrite(String),

    // --- storage plumbing ---
    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CleoError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn validation(violations: Vec<RuleViolation>) -> Self {
        Self::Validation(violations)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The error code string used in the dispatch envelope (§4.5, §7).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Internal(_) => "E_INTERNAL",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::LockTimeout => "E_LOCK_TIMEOUT",
            Self::Cancelled => "E_CANCELLED",
            Self::NoHandler(_) => "E_NO_HANDLER",
            Self::Validation(_) => "E_VALIDATION",
            Self::HasChildren(_) => "E_HAS_CHILDREN",
            Self::CircularHierarchy => "E_CIRCULAR_HIERARCHY",
            Self::ChecksumMismatch => "E_CHECKSUM_MISMATCH",
            Self::TaskClaimed(_) => "E_TASK_CLAIMED",
            Self::ConcurrentModification => "E_CONCURRENT_MODIFICATION",
            Self::SessionExists => "E_SESSION_EXISTS",
            Self::TaskNotInScope(_) => "E_TASK_NOT_IN_SCOPE",
            Self::SessionNotFound(_) => "E_SESSION_NOT_FOUND",
            Self::CircularValidation => "E_CIRCULAR_VALIDATION",
            Self::AgentNotWhitelisted(_) => "E_AGENT_NOT_WHITELISTED",
            Self::HandoffRequired => "E_HANDOFF_REQUIRED",
            Self::GateFailed(_) => "E_GATE_FAILED",
            Self::ArtifactWrite(_) => "E_ARTIFACT_WRITE",
            Self::Store(_) => "E_STORE",
            Self::Configuration(_) => "E_CONFIGURATION",
        }
    }

    /// The fixed numeric exit code from the §6 table.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Internal(_) => 1,
            Self::InvalidInput(_) => 2,
            Self::NotFound(_) => 4,
            Self::LockTimeout => 7,
            Self::Cancelled => 3,
            Self::NoHandler(_) => 3,
            Self::Validation(_) => 10,
            Self::HasChildren(_) => 11,
            Self::CircularHierarchy => 12,
            Self::ChecksumMismatch => 20,
            Self::TaskClaimed(_) => 21,
            Self::ConcurrentModification => 22,
            Self::SessionExists => 30,
            Self::TaskNotInScope(_) => 31,
            Self::SessionNotFound(_) => 32,
            Self::CircularValidation => 70,
            Self::AgentNotWhitelisted(_) => 71,
            Self::HandoffRequired => 65,
            Self::GateFailed(_) => 80,
            Self::ArtifactWrite(_) => 85,
            Self::Store(_) => 1,
            Self::Configuration(_) => 1,
        }
    }

    /// Remediation text for the dispatch envelope's `fix` field, where one
    /// exists (§7: "gate failures ... surfaced with fix text").
    pub fn fix(&self) -> Option<String> {
        match self {
            Self::ChecksumMismatch => Some("run 'admin backup restore' to recover a known-good snapshot".into()),
            Self::HandoffRequired => Some("re-invoke with an explicit 'acceptedBy' after calling pipeline.decision.accept".into()),
            Self::HasChildren(_) => Some("cascade the delete explicitly or archive children first".into()),
            Self::SessionExists => Some("end or suspend the active session before starting a new one".into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_fixed_table() {
        assert_eq!(CleoError::ChecksumMismatch.exit_code(), 20);
        assert_eq!(CleoError::CircularValidation.exit_code(), 70);
        assert_eq!(CleoError::HandoffRequired.exit_code(), 65);
        assert_eq!(CleoError::LockTimeout.exit_code(), 7);
    }

    #[test]
    fn checksum_mismatch_points_at_restore() {
        let err = CleoError::ChecksumMismatch;
        assert!(err.fix().unwrap().contains("restore"));
    }
}
