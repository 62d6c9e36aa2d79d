//! Busy/idle tracking for the engine process.
//!
//! The engine never announces "I am idle"; the bridge derives it from
//! command/response pairing: `uci` is answered by `uciok`, `isready` by
//! `readyok`, and a search started with `go` concludes with `bestmove`.
//! The engine counts as quiescent only when no replies are outstanding and
//! no search is running. Hand-offs must not proceed before that point.

use crate::command::{ClientCommand, EngineEvent};

#[derive(Debug, Default)]
pub struct QuiescenceTracker {
    pending_uciok: u64,
    pending_readyok: u64,
    searching: bool,
}

impl QuiescenceTracker {
    pub fn new() -> QuiescenceTracker {
        QuiescenceTracker::default()
    }

    /// Record a command written to the engine.
    pub fn command_sent(&mut self, command: &ClientCommand) {
        match command {
            ClientCommand::Uci => self.pending_uciok += 1,
            ClientCommand::Isready => self.pending_readyok += 1,
            ClientCommand::Go => self.searching = true,
            _ => (),
        }
    }

    /// Record a line read from the engine.
    pub fn event_seen(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Uciok => self.pending_uciok = self.pending_uciok.saturating_sub(1),
            EngineEvent::Readyok => self.pending_readyok = self.pending_readyok.saturating_sub(1),
            EngineEvent::Bestmove => self.searching = false,
            _ => (),
        }
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    pub fn is_idle(&self) -> bool {
        self.pending_uciok == 0 && self.pending_readyok == 0 && !self.searching
    }

    /// Forget all outstanding state. Used when the process is replaced;
    /// replies owed by the dead incarnation will never arrive.
    pub fn reset(&mut self) {
        *self = QuiescenceTracker::default();
    }
}
