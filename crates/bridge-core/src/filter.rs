//! Command filter: the only gate between client input and the engine
//! process.
//!
//! The filter is pure and stateless: given the same command and the same
//! limits, the decision is always the same, independent of which session
//! or connection produced it. Everything outside the allow-list is
//! rejected and never reaches the engine.

use thiserror::Error;

use crate::command::{ClientCommand, UciOptionName};

/// Upper bounds advertised at registration time and enforced on
/// `setoption` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLimits {
    /// Maximum thread count a client may request.
    pub max_threads: u64,
    /// Maximum hash table size in MiB.
    pub max_hash: u64,
    /// Variants the engine supports; empty means standard chess only.
    pub variants: Vec<String>,
}

impl Default for EngineLimits {
    fn default() -> EngineLimits {
        EngineLimits {
            max_threads: 1,
            max_hash: 16,
            variants: Vec::new(),
        }
    }
}

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unsupported command: {0}")]
    Unsupported(String),
    #[error("invalid value for option {0}")]
    InvalidOptionValue(UciOptionName),
    #[error("unsupported variant: {0}")]
    UnknownVariant(String),
    /// Only one search may run at a time; issued by the arbiter, not the
    /// filter, since the filter itself is stateless.
    #[error("search already in progress")]
    SearchInProgress,
}

/// Outcome of filtering a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Forward the raw line untouched.
    Allow,
    /// Forward a rewritten line (an out-of-range option was clamped).
    Transform {
        line: String,
        name: UciOptionName,
        value: String,
    },
    /// Accepted, but answered locally with no engine interaction.
    LocalNoop,
    /// Refused; nothing reaches the engine.
    Reject(Rejection),
}

#[derive(Debug, Clone)]
pub struct CommandFilter {
    limits: EngineLimits,
}

impl CommandFilter {
    pub fn new(limits: EngineLimits) -> CommandFilter {
        CommandFilter { limits }
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub fn filter(&self, command: &ClientCommand) -> FilterDecision {
        match command {
            ClientCommand::Uci
            | ClientCommand::Debug
            | ClientCommand::Isready
            | ClientCommand::Ucinewgame
            | ClientCommand::Position
            | ClientCommand::Go
            | ClientCommand::Stop
            | ClientCommand::Ponderhit => FilterDecision::Allow,

            ClientCommand::Register => FilterDecision::LocalNoop,

            ClientCommand::Quit => {
                FilterDecision::Reject(Rejection::Unsupported("quit".to_owned()))
            }

            ClientCommand::Unknown { verb } => {
                FilterDecision::Reject(Rejection::UnknownCommand(verb.clone()))
            }

            ClientCommand::Setoption { name, value } => self.filter_setoption(name, value),
        }
    }

    fn filter_setoption(&self, name: &UciOptionName, value: &Option<String>) -> FilterDecision {
        if *name == "Threads" {
            self.clamp_spin(name, value, self.limits.max_threads)
        } else if *name == "Hash" {
            self.clamp_spin(name, value, self.limits.max_hash)
        } else if *name == "UCI_Variant" {
            match value {
                Some(variant)
                    if self
                        .limits
                        .variants
                        .iter()
                        .any(|v| v.eq_ignore_ascii_case(variant)) =>
                {
                    FilterDecision::Allow
                }
                Some(variant) => {
                    FilterDecision::Reject(Rejection::UnknownVariant(variant.clone()))
                }
                None => FilterDecision::Reject(Rejection::InvalidOptionValue(name.clone())),
            }
        } else {
            FilterDecision::Allow
        }
    }

    fn clamp_spin(
        &self,
        name: &UciOptionName,
        value: &Option<String>,
        max: u64,
    ) -> FilterDecision {
        let Some(raw) = value else {
            return FilterDecision::Reject(Rejection::InvalidOptionValue(name.clone()));
        };
        let Ok(requested) = raw.trim().parse::<u64>() else {
            return FilterDecision::Reject(Rejection::InvalidOptionValue(name.clone()));
        };
        let clamped = requested.clamp(1, max.max(1));
        if clamped == requested {
            FilterDecision::Allow
        } else {
            FilterDecision::Transform {
                line: format!("setoption name {name} value {clamped}"),
                name: name.clone(),
                value: clamped.to_string(),
            }
        }
    }
}
