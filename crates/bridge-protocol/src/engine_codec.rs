//! Classification of engine output lines.
//!
//! The bridge relays engine output verbatim; classification exists for
//! quiescence tracking (`uciok` / `readyok` / `bestmove`), for the startup
//! probe (`id name`, `option` declarations) and for log levels (`info`
//! lines are chatty and logged at debug). Anything unrecognized is
//! [`EngineEvent::Other`]: engines print banners and nonstandard lines,
//! and that must never be an error.

use bridge_core::command::{EngineEvent, OptionDecl, UciOptionName};

/// Classify one line of engine stdout.
pub fn parse_engine_line(line: &str) -> EngineEvent {
    let trimmed = line.trim();
    let mut tokens = trimmed.split_whitespace();
    match tokens.next() {
        Some("uciok") => EngineEvent::Uciok,
        Some("readyok") => EngineEvent::Readyok,
        Some("bestmove") => EngineEvent::Bestmove,
        Some("info") => EngineEvent::Info,
        Some("id") => match tokens.next() {
            Some("name") => EngineEvent::IdName(tokens.collect::<Vec<_>>().join(" ")),
            _ => EngineEvent::Other,
        },
        Some("option") => match parse_option_decl(trimmed) {
            Some(decl) => EngineEvent::OptionDecl(decl),
            None => EngineEvent::Other,
        },
        _ => EngineEvent::Other,
    }
}

/// `option name <id> type <t> [default <x>] [min <x>] [max <x>] [var <x>]*`
///
/// Only the pieces the bridge consumes are kept: the name, spin bounds and
/// combo alternatives.
fn parse_option_decl(line: &str) -> Option<OptionDecl> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 || tokens[1] != "name" {
        return None;
    }
    let type_at = tokens.iter().position(|t| *t == "type")?;
    if type_at <= 2 {
        return None;
    }
    let name = UciOptionName(tokens[2..type_at].join(" "));

    let mut min = None;
    let mut max = None;
    let mut vars = Vec::new();

    let is_keyword = |t: &str| matches!(t, "default" | "min" | "max" | "var" | "type");
    let mut idx = type_at + 1;
    while idx < tokens.len() {
        match tokens[idx] {
            "min" => {
                min = tokens.get(idx + 1).and_then(|t| t.parse::<i64>().ok());
                idx += 2;
            }
            "max" => {
                max = tokens.get(idx + 1).and_then(|t| t.parse::<i64>().ok());
                idx += 2;
            }
            "var" => {
                let start = idx + 1;
                let mut end = start;
                while end < tokens.len() && !is_keyword(tokens[end]) {
                    end += 1;
                }
                if end > start {
                    vars.push(tokens[start..end].join(" "));
                }
                idx = end;
            }
            _ => idx += 1,
        }
    }

    Some(OptionDecl {
        name,
        min,
        max,
        vars,
    })
}
