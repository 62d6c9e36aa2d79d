//! bridge-core
//!
//! Pure session-multiplexer logic:
//! - command/event model (typed UCI traffic)
//! - command filter (allow-list + option bounds)
//! - session registry (remembered options, LRU-bounded)
//! - quiescence tracking (busy/idle derivation)
//! - exclusivity arbiter (ownership + hand-off state machine)

pub mod arbiter;
pub mod command;
pub mod filter;
pub mod quiescence;
pub mod session;

pub use arbiter::{Action, Arbiter, ConnId};
pub use command::{ClientCommand, EngineEvent, OptionDecl, UciOptionName};
pub use filter::{CommandFilter, EngineLimits, FilterDecision, Rejection};
pub use quiescence::QuiescenceTracker;
pub use session::{Session, SessionId, SessionStore};
