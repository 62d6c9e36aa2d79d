//! Exclusivity arbiter: decides which connection currently owns the
//! engine and executes the hand-off protocol when ownership changes.
//!
//! The arbiter is a pure state machine. Inputs are client commands, engine
//! output events, connect/disconnect notifications and crash signals;
//! outputs are [`Action`]s the surrounding runtime performs (write a line
//! to the engine, send a line to a client, log a rejection). Keeping the
//! machine free of I/O makes the hand-off protocol testable as plain
//! state transitions.
//!
//! States: `Idle` (no owner), `Reserving` (hand-off in flight),
//! `Owned(conn)`. `Owned` may transition directly to `Reserving` for a
//! different connection without passing through `Idle`, but every hand-off
//! passes through the same sequence: stop if busy, wait for quiescence,
//! reset, reapply the new owner's remembered options, then forward the
//! queued commands.

use std::collections::{HashMap, VecDeque};
use std::mem;

use crate::command::{ClientCommand, EngineEvent};
use crate::filter::{CommandFilter, FilterDecision, Rejection};
use crate::quiescence::QuiescenceTracker;
use crate::session::{SessionId, SessionStore};

/// Identifier for a connected client.
///
/// Intentionally opaque; unique over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// Side effect the runtime must perform on behalf of the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write one line to the engine process.
    EngineWrite(String),
    /// Send one line to a client connection.
    ClientSend(ConnId, String),
    /// A command was filtered out; nothing reached the engine.
    Reject(ConnId, Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandoffStage {
    /// `stop` injected if the engine was busy; waiting for quiescence.
    AwaitingDrain,
    /// `ucinewgame` + `isready` written; waiting for `readyok`.
    ResetIssued,
}

#[derive(Debug)]
struct Handoff {
    /// The connection the engine is being handed to.
    to: ConnId,
    /// The outgoing owner, still entitled to drain output (its final
    /// `bestmove` in particular).
    from: Option<ConnId>,
    stage: HandoffStage,
    /// Commands from the claimant, forwarded once the hand-off completes.
    queued: VecDeque<(ClientCommand, String)>,
}

#[derive(Debug)]
enum State {
    Idle,
    Reserving(Handoff),
    Owned(ConnId),
}

pub struct Arbiter {
    state: State,
    tracker: QuiescenceTracker,
    filter: CommandFilter,
    store: SessionStore,
    /// Which session each live connection belongs to.
    conns: HashMap<ConnId, SessionId>,
}

impl Arbiter {
    pub fn new(filter: CommandFilter, store: SessionStore) -> Arbiter {
        Arbiter {
            state: State::Idle,
            tracker: QuiescenceTracker::new(),
            filter,
            store,
            conns: HashMap::new(),
        }
    }

    /// The connection currently holding the ownership token, if any.
    pub fn owner(&self) -> Option<ConnId> {
        match self.state {
            State::Owned(conn) => Some(conn),
            _ => None,
        }
    }

    pub fn is_searching(&self) -> bool {
        self.tracker.is_searching()
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    /// Register a connection and bind it to its session.
    pub fn connect(&mut self, conn: ConnId, session: SessionId) {
        self.store.acquire(&session);
        self.conns.insert(conn, session);
    }

    /// A connection vanished. If it owned the engine this is an implicit
    /// `stop` + release; the engine is left idle and ownerless. Session
    /// state survives for a later reconnect.
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(session) = self.conns.remove(&conn) {
            self.store.release(&session);
        }
        let owned_by_conn = matches!(self.state, State::Owned(owner) if owner == conn);
        if owned_by_conn {
            if self.tracker.is_searching() {
                actions.push(Action::EngineWrite("stop".to_owned()));
            }
            self.state = State::Idle;
        } else if let State::Reserving(handoff) = &mut self.state {
            if handoff.from == Some(conn) {
                handoff.from = None;
            }
            // A hand-off is never cancelled once started; if the claimant
            // is gone its queue is dropped and the token is released as
            // soon as the sequence completes.
            if handoff.to == conn {
                handoff.queued.clear();
            }
        }
        actions
    }

    /// Process one filtered-and-classified command line from a client.
    pub fn client_command(&mut self, conn: ConnId, cmd: ClientCommand, raw: &str) -> Vec<Action> {
        let mut actions = Vec::new();

        // `stop` bypasses ownership checks and hand-off queues entirely:
        // an in-progress infinite search must always be interruptible.
        if cmd == ClientCommand::Stop {
            actions.push(Action::EngineWrite("stop".to_owned()));
            return actions;
        }

        let (line, remember) = match self.filter.filter(&cmd) {
            FilterDecision::Reject(reason) => {
                actions.push(Action::Reject(conn, reason));
                return actions;
            }
            FilterDecision::LocalNoop => return actions,
            FilterDecision::Allow => {
                let remember = match &cmd {
                    ClientCommand::Setoption { name, value } => {
                        Some((name.clone(), value.clone()))
                    }
                    _ => None,
                };
                (raw.trim().to_owned(), remember)
            }
            FilterDecision::Transform { line, name, value } => (line, Some((name, Some(value)))),
        };

        // Remember option values (post-clamp) on the caller's session, so
        // replay after a hand-off restores exactly what was admitted.
        let is_setoption = remember.is_some();
        if let Some((name, value)) = remember {
            if let Some(session_id) = self.conns.get(&conn).cloned() {
                self.store.touch(&session_id);
                if let Some(session) = self.store.get_mut(&session_id) {
                    session.set_option(name, value);
                }
            }
        }

        match mem::replace(&mut self.state, State::Idle) {
            State::Owned(owner) if owner == conn => {
                self.state = State::Owned(owner);
                if matches!(cmd, ClientCommand::Go) && self.tracker.is_searching() {
                    actions.push(Action::Reject(conn, Rejection::SearchInProgress));
                    return actions;
                }
                self.note_process_state(conn, &cmd);
                self.tracker.command_sent(&cmd);
                actions.push(Action::EngineWrite(line));
            }
            State::Owned(other) => {
                // Busy-preemption path: Owned -> Reserving directly.
                self.begin_handoff(conn, Some(other), cmd, line, is_setoption, &mut actions);
            }
            State::Idle => {
                self.begin_handoff(conn, None, cmd, line, is_setoption, &mut actions);
            }
            State::Reserving(mut handoff) => {
                if handoff.to == conn {
                    if !is_setoption {
                        handoff.queued.push_back((cmd, line));
                    }
                } else {
                    // A competing claimant while a hand-off is in flight:
                    // the stop/drain/reset sequence continues untouched,
                    // but its beneficiary is replaced (latest wins). The
                    // superseded claimant's queue is dropped.
                    handoff.to = conn;
                    handoff.queued.clear();
                    if !is_setoption {
                        handoff.queued.push_back((cmd, line));
                    }
                }
                self.state = State::Reserving(handoff);
            }
        }
        actions
    }

    /// Process one output line from the engine.
    pub fn engine_event(&mut self, event: EngineEvent, raw: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        self.tracker.event_seen(&event);

        // Engine output goes to the current owner only. During the drain
        // phase of a hand-off the outgoing owner still gets it; once the
        // reset is issued the output belongs to the bridge and is dropped.
        let target = match &self.state {
            State::Owned(conn) => Some(*conn),
            State::Reserving(handoff) if handoff.stage == HandoffStage::AwaitingDrain => {
                handoff.from
            }
            _ => None,
        };
        if let Some(conn) = target {
            actions.push(Action::ClientSend(conn, raw.to_owned()));
        }

        self.advance_handoff(&mut actions);
        actions
    }

    /// The engine process died and was replaced. Any in-flight hand-off is
    /// dropped, every session must have its options reapplied, and the
    /// owner (if any) is told that its context is gone.
    pub fn engine_crashed(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if let State::Owned(owner) = self.state {
            actions.push(Action::ClientSend(
                owner,
                "info string engine restarted, session context lost".to_owned(),
            ));
        }
        self.state = State::Idle;
        self.tracker.reset();
        self.store.mark_all_dirty();
        actions
    }

    /// A resource ceiling was breached: force a `stop`. Escalation (kill
    /// and restart if the engine refuses to quiesce) is the supervisor's
    /// job; the arbiter only injects the interrupt.
    pub fn ceiling_exceeded(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.tracker.is_searching() {
            if let State::Owned(owner) = self.state {
                actions.push(Action::ClientSend(
                    owner,
                    "info string search stopped: resource limit reached".to_owned(),
                ));
            }
            actions.push(Action::EngineWrite("stop".to_owned()));
        }
        actions
    }

    fn begin_handoff(
        &mut self,
        to: ConnId,
        from: Option<ConnId>,
        cmd: ClientCommand,
        line: String,
        is_setoption: bool,
        actions: &mut Vec<Action>,
    ) {
        if self.tracker.is_searching() {
            // Injected on behalf of the outgoing owner.
            actions.push(Action::EngineWrite("stop".to_owned()));
        }
        let mut queued = VecDeque::new();
        if !is_setoption {
            // A `setoption` is not queued: it is already remembered and
            // the reapply stage will deliver it exactly once.
            queued.push_back((cmd, line));
        }
        self.state = State::Reserving(Handoff {
            to,
            from,
            stage: HandoffStage::AwaitingDrain,
            queued,
        });
        self.advance_handoff(actions);
    }

    /// Drive a pending hand-off as far as the engine state allows.
    fn advance_handoff(&mut self, actions: &mut Vec<Action>) {
        let awaiting_drain = matches!(
            &self.state,
            State::Reserving(h) if h.stage == HandoffStage::AwaitingDrain
        );
        if awaiting_drain && self.tracker.is_idle() {
            // Quiescent: issue the reset. `isready` gives us a positive
            // acknowledgement that the reset has been consumed.
            self.tracker.command_sent(&ClientCommand::Ucinewgame);
            actions.push(Action::EngineWrite("ucinewgame".to_owned()));
            self.tracker.command_sent(&ClientCommand::Isready);
            actions.push(Action::EngineWrite("isready".to_owned()));
            if let State::Reserving(handoff) = &mut self.state {
                handoff.stage = HandoffStage::ResetIssued;
            }
            return;
        }

        let reset_done = matches!(
            &self.state,
            State::Reserving(h) if h.stage == HandoffStage::ResetIssued
        );
        if reset_done && self.tracker.is_idle() {
            let State::Reserving(handoff) = mem::replace(&mut self.state, State::Idle) else {
                unreachable!("state checked above");
            };

            // Claimant vanished while the sequence ran: leave the engine
            // idle and ownerless.
            let Some(session_id) = self.conns.get(&handoff.to).cloned() else {
                return;
            };

            // Reapply the new owner's remembered options, in the order
            // they were last set, before anything else it sent.
            let replay = match self.store.get_mut(&session_id) {
                Some(session) => {
                    let lines = session.replay_lines();
                    session.mark_clean();
                    lines
                }
                None => Vec::new(),
            };
            for line in replay {
                actions.push(Action::EngineWrite(line));
            }

            for (cmd, line) in handoff.queued {
                if matches!(cmd, ClientCommand::Go) && self.tracker.is_searching() {
                    actions.push(Action::Reject(handoff.to, Rejection::SearchInProgress));
                    continue;
                }
                self.note_process_state(handoff.to, &cmd);
                self.tracker.command_sent(&cmd);
                actions.push(Action::EngineWrite(line));
            }

            self.state = State::Owned(handoff.to);
        }
    }

    /// Track whether the engine still matches the session's reset state.
    fn note_process_state(&mut self, conn: ConnId, cmd: &ClientCommand) {
        let dirty = matches!(cmd, ClientCommand::Position | ClientCommand::Go);
        let clean = matches!(cmd, ClientCommand::Ucinewgame);
        if !dirty && !clean {
            return;
        }
        if let Some(session_id) = self.conns.get(&conn).cloned() {
            if let Some(session) = self.store.get_mut(&session_id) {
                if dirty {
                    session.mark_dirty();
                } else {
                    session.mark_clean();
                }
            }
        }
    }
}
