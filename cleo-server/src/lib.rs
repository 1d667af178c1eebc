//! RPC frontend for CLEO.
//!
//! Bridges a line-delimited JSON request/response protocol over stdio to
//! [`cleo_dispatch::CleoDispatcher`]. The wire framing an actual MCP client
//! would need (handshake, tool schemas) is out of scope here — this crate
//! provides only the minimal loop needed to exercise the dispatch contract
//! (§1, §6).

pub mod stdio;
pub mod telemetry;

pub use stdio::StdioRpcServer;
pub use telemetry::init_telemetry;
