//! bridge-protocol
//!
//! Text codec between the line-oriented UCI protocol and the typed model
//! in `bridge-core`.
//!
//! - [`client_codec`] : client messages → [`bridge_core::ClientCommand`]
//! - [`engine_codec`] : engine stdout lines → [`bridge_core::EngineEvent`]

pub mod client_codec;
pub mod engine_codec;

pub use client_codec::{parse_client_line, ProtocolError};
pub use engine_codec::parse_engine_line;
