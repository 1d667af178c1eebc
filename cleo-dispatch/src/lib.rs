//! The dispatch layer (§4.5): turns the closed `Operation` contract defined
//! in `cleo-core` into a working implementation over the five `cleo-engine`
//! engines.
//!
//! # Overview
//!
//! - [`wire`] parses a dotted operation name (`"tasks.add"`) plus flat JSON
//!   params into an [`cleo_core::dispatch::Operation`] — the boundary where
//!   untyped frontend input becomes a typed, exhaustiveness-checked value.
//! - [`dispatcher`] provides [`CleoDispatcher`], the concrete
//!   [`cleo_core::dispatch::Dispatcher`]: it serializes mutations behind a
//!   single advisory lock (§5), routes each `Operation` to its engine, and
//!   wraps every call in audit middleware (§4.5).
//!
//! Frontends (`cleo-server`, `cleo-cli`) depend only on
//! `cleo_core::dispatch::Dispatcher` and construct a `CleoDispatcher` once at
//! startup, behind an `Arc`.
//!
//! ```no_run
//! use cleo_dispatch::CleoDispatcher;
//! use cleo_core::models::GateEnforcement;
//! use cleo_engine::GraphConfig;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn example<S: cleo_core::store::Store + 'static>(store: Arc<S>) {
//! let dispatcher = CleoDispatcher::new(
//!     store,
//!     GraphConfig::default(),
//!     PathBuf::from("./artifacts"),
//!     GateEnforcement::Strict,
//! );
//! # let _ = dispatcher;
//! # }
//! ```

pub mod dispatcher;
pub mod wire;

pub use dispatcher::CleoDispatcher;
