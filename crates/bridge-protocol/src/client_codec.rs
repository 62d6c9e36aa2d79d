//! Classification of client input lines.
//!
//! One transport message must carry exactly one protocol line; embedded
//! line breaks are a framing violation and terminal for the connection
//! (they would let a client smuggle a second command past the filter).
//! Beyond that the codec is forgiving: unknown verbs and malformed
//! `setoption` arguments become [`ClientCommand::Unknown`], which the
//! filter rejects without killing the connection.

use bridge_core::command::{ClientCommand, UciOptionName};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unexpected line break in command")]
    UnexpectedLineBreak,
}

/// Parse one client message into a command.
///
/// Returns `Ok(None)` for blank input, which is silently ignored.
pub fn parse_client_line(line: &str) -> Result<Option<ClientCommand>, ProtocolError> {
    if line.contains(['\r', '\n']) {
        return Err(ProtocolError::UnexpectedLineBreak);
    }
    let trimmed = line.trim();
    let Some(verb) = trimmed.split_whitespace().next() else {
        return Ok(None);
    };

    let command = match verb {
        "uci" => ClientCommand::Uci,
        "debug" => ClientCommand::Debug,
        "isready" => ClientCommand::Isready,
        "setoption" => parse_setoption(trimmed),
        "register" => ClientCommand::Register,
        "ucinewgame" => ClientCommand::Ucinewgame,
        "position" => ClientCommand::Position,
        "go" => ClientCommand::Go,
        "stop" => ClientCommand::Stop,
        "ponderhit" => ClientCommand::Ponderhit,
        "quit" => ClientCommand::Quit,
        other => ClientCommand::Unknown {
            verb: other.to_owned(),
        },
    };
    Ok(Some(command))
}

/// `setoption name <id> [value <x>]`. The name runs up to the `value`
/// keyword and may contain spaces; so may the value, which runs to the end
/// of the line. Internal runs of whitespace are collapsed.
fn parse_setoption(line: &str) -> ClientCommand {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 || tokens[1] != "name" {
        return malformed_setoption();
    }

    let value_at = tokens.iter().position(|t| *t == "value");
    let (name_tokens, value) = match value_at {
        Some(idx) if idx > 2 => (&tokens[2..idx], Some(tokens[idx + 1..].join(" "))),
        Some(_) => return malformed_setoption(),
        None => (&tokens[2..], None),
    };
    if name_tokens.is_empty() {
        return malformed_setoption();
    }

    ClientCommand::Setoption {
        name: UciOptionName(name_tokens.join(" ")),
        value,
    }
}

fn malformed_setoption() -> ClientCommand {
    ClientCommand::Unknown {
        verb: "setoption".to_owned(),
    }
}
