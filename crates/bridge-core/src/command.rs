//! Typed model of the line-oriented UCI traffic crossing the bridge.
//!
//! Two closed enums:
//! - [`ClientCommand`]: everything a client may say towards the engine.
//! - [`EngineEvent`]: everything the engine says back.
//!
//! Classification is by leading verb. Payloads stay as raw text except
//! where the bridge itself needs structure (`setoption` arguments, engine
//! `option` declarations). Input outside the known verbs maps to an
//! explicit [`ClientCommand::Unknown`] variant so the filter can reject it
//! instead of passing it through.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A UCI option name.
///
/// Compares and hashes case-insensitively; the protocol states that option
/// names are not case sensitive.
#[derive(Clone, Debug, Eq)]
pub struct UciOptionName(pub String);

impl PartialEq for UciOptionName {
    fn eq(&self, other: &UciOptionName) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<str> for UciOptionName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for UciOptionName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for UciOptionName {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        for byte in self.0.bytes() {
            hasher.write_u8(byte.to_ascii_lowercase());
        }
        hasher.write_u8(0xff);
    }
}

impl fmt::Display for UciOptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for UciOptionName {
    fn from(name: &str) -> UciOptionName {
        UciOptionName(name.to_owned())
    }
}

/// A client command, classified by its leading verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Uci,
    Debug,
    Isready,
    Setoption {
        name: UciOptionName,
        value: Option<String>,
    },
    /// Legacy copy-protection verb. Answered locally, never forwarded.
    Register,
    Ucinewgame,
    Position,
    Go,
    Stop,
    Ponderhit,
    /// Recognized so it can be refused explicitly; a client must not be
    /// able to terminate the shared engine process.
    Quit,
    /// Anything outside the allow-list, including malformed `setoption`.
    Unknown { verb: String },
}

impl ClientCommand {
    /// The verb token, for logging.
    pub fn verb(&self) -> &str {
        match self {
            ClientCommand::Uci => "uci",
            ClientCommand::Debug => "debug",
            ClientCommand::Isready => "isready",
            ClientCommand::Setoption { .. } => "setoption",
            ClientCommand::Register => "register",
            ClientCommand::Ucinewgame => "ucinewgame",
            ClientCommand::Position => "position",
            ClientCommand::Go => "go",
            ClientCommand::Stop => "stop",
            ClientCommand::Ponderhit => "ponderhit",
            ClientCommand::Quit => "quit",
            ClientCommand::Unknown { verb } => verb,
        }
    }
}

/// An engine `option` declaration, reduced to what the bridge cares about:
/// spin bounds (for `Threads` / `Hash` maxima) and combo alternatives
/// (for `UCI_Variant`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDecl {
    pub name: UciOptionName,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub vars: Vec<String>,
}

/// An engine output line, classified by its leading verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    IdName(String),
    OptionDecl(OptionDecl),
    Uciok,
    Readyok,
    /// Terminal line of a search; the engine is quiescent afterwards.
    Bestmove,
    Info,
    /// Unrecognized output. Relayed as-is to the owner; engines print all
    /// sorts of banners.
    Other,
}
