//! Domain models, error types, validation rules, the Store trait family,
//! and the dispatch contract shared by every other crate in the workspace.
//!
//! # Architecture
//!
//! - [`models`] - task graph, verification, session, lifecycle pipeline,
//!   decision record, document manifest, and observability entities (§3).
//! - [`error`] - the closed `CleoError` enumeration and exit-code table (§7).
//! - [`validation`] - field validators and the universal-invariant suite (§8).
//! - [`store`] - the `Store` accessor trait and read-only view traits (§4.1, §9).
//! - [`dispatch`] - the typed operation registry contract (§4.5).
//! - [`config`] - hierarchical configuration merge (§6).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod store;
pub mod validation;

pub use dispatch::{DispatchContext, DispatchKind, DispatchResult, Dispatcher, Operation};
pub use error::{CleoError, Result, RuleViolation};
pub use models::*;
pub use store::{ArchiveSource, DecisionView, Store, StoreStats, TaskGraphView};
pub use validation::{check_invariants, compute_checksum, FieldValidator, TaskSetView};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_constants_are_set() {
        assert!(!VERSION.is_empty());
        assert_eq!(CRATE_NAME, "cleo-core");
    }
}
