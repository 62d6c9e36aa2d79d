//! bridge-server
//!
//! Multi-client WebSocket provider for a single UCI engine process.

pub mod config;
pub mod registration;
pub mod server;
pub mod supervisor;
pub mod types;
pub mod watchdog;

// these are internal modules, not re-exported
mod arbiter_task;
mod client;
