//! SQLite-backed implementation of `cleo_core::store::Store`.
//!
//! Offers task persistence with connection pooling, forward-only SQL
//! migrations, and the checksum/advisory-lock machinery (§4.1).
//!
//! # Usage
//!
//! ```no_run
//! use cleo_store::SqliteStore;
//! use cleo_core::store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::connect("sqlite::memory:").await?;
//!     store.migrate().await?;
//!     store.health_check().await?;
//!     Ok(())
//! }
//! ```

mod common;
mod sqlite;

pub use sqlite::SqliteStore;

pub use cleo_core::{
    error::{CleoError, Result},
    models::*,
    store::{ArchiveSource, DecisionFilter, SessionFilter, Store, StoreStats},
};
