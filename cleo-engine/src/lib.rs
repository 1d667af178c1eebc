//! The business-logic layer between a `Store` implementation and the
//! dispatch frontends: every engine is generic over `S: Store` and holds
//! nothing but an `Arc<S>` plus its own configuration, so the same engine
//! runs against `SqliteStore` in production and `MockStore` in tests.
//!
//! # Architecture
//!
//! - [`task_graph`] - hierarchy, dependency waves, critical path, impact
//!   analysis, and the verification gate state machine (§4.1, §4.2).
//! - [`lifecycle`] - the RCASD-ICR stage pipeline, its gate predicates, and
//!   the ADR decision record with HITL acceptance and supersession (§4.3).
//! - [`session`] - session scope, chained handoff/debrief, briefing, and
//!   the context-budget ledger (§4.4).
//! - [`orchestration`] - ready/next/waves/validate/spawn/startup, the
//!   read-only views that sit on top of the task graph (§4.6).
//! - [`compliance`] - protocol compliance scoring and the coherence-check
//!   composite (§4.6, §8).

pub mod compliance;
pub mod lifecycle;
pub mod orchestration;
pub mod session;
pub mod task_graph;

pub use compliance::{ComplianceEngine, CoherenceReport};
pub use lifecycle::LifecycleEngine;
pub use orchestration::{EpicStatus, OrchestrationEngine, Readiness, SpawnContext};
pub use session::{Briefing, Debrief, Handoff, ScopeChecker, SessionEngine};
pub use task_graph::{Cycle, GraphConfig, TaskGraphEngine};
