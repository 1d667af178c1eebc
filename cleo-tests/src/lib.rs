//! No library surface; this crate exists to hold the scenario suite under
//! `tests/` and its `dev-dependencies` on the engine/dispatch/mocks crates.
