//! Session registry: per-client state that outlives any single
//! connection.
//!
//! A session is keyed by a client-supplied identifier reused across
//! reconnects. It remembers the engine options the client has requested,
//! in the order they were last set, so they can be replayed verbatim when
//! the session regains ownership of the engine. The store is bounded: the
//! least recently used session is evicted once the capacity is exceeded,
//! but never while a live connection still references it.

use indexmap::IndexMap;

use crate::command::UciOptionName;

/// Stable identifier for a logical client session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Remembered state for one session.
#[derive(Debug, Default)]
pub struct Session {
    /// Option name -> value, iteration order = replay order.
    options: IndexMap<UciOptionName, Option<String>>,
    /// Whether the engine state is known to be fresh (post `ucinewgame`,
    /// options applied) for this session. Crashes force this to false.
    clean: bool,
    /// Live connections currently bound to this session.
    refs: u32,
}

impl Session {
    /// Record an option value. Re-setting an existing option moves it to
    /// the back, so replay order always mirrors the most recent order the
    /// client issued the commands in.
    pub fn set_option(&mut self, name: UciOptionName, value: Option<String>) {
        self.options.shift_remove(&name);
        self.options.insert(name, value);
    }

    /// The remembered options as `setoption` lines, in replay order.
    pub fn replay_lines(&self) -> Vec<String> {
        self.options
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("setoption name {name} value {value}"),
                None => format!("setoption name {name}"),
            })
            .collect()
    }

    pub fn option_value(&self, name: &UciOptionName) -> Option<&str> {
        self.options.get(name).and_then(|v| v.as_deref())
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }

    pub fn mark_clean(&mut self) {
        self.clean = true;
    }

    pub fn mark_dirty(&mut self) {
        self.clean = false;
    }
}

/// Bounded LRU store of sessions.
#[derive(Debug)]
pub struct SessionStore {
    /// Insertion order doubles as recency order: front = least recently
    /// used, back = most recently used.
    sessions: IndexMap<SessionId, Session>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> SessionStore {
        SessionStore {
            sessions: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Bind a connection to the session, creating it on first contact.
    pub fn acquire(&mut self, id: &SessionId) -> &mut Session {
        self.touch(id);
        if !self.sessions.contains_key(id) {
            self.sessions.insert(id.clone(), Session::default());
        }
        // Pin before evicting, or the freshly created session would be an
        // eviction candidate itself.
        if let Some(session) = self.sessions.get_mut(id) {
            session.refs += 1;
        }
        self.evict_over_capacity();
        self.sessions.get_mut(id).expect("session pinned by live ref")
    }

    /// Drop a connection's binding. The session itself stays remembered.
    pub fn release(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.refs = session.refs.saturating_sub(1);
        }
    }

    /// Move a session to the most-recently-used position.
    pub fn touch(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.shift_remove(id) {
            self.sessions.insert(id.clone(), session);
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Force full option reapplication on every session's next ownership.
    /// Called when the engine process has been replaced.
    pub fn mark_all_dirty(&mut self) {
        for session in self.sessions.values_mut() {
            session.mark_dirty();
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.sessions.len() > self.capacity {
            let victim = self
                .sessions
                .iter()
                .find(|(_, session)| session.refs == 0)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => {
                    self.sessions.shift_remove(&id);
                }
                // Every session is pinned by a live connection; tolerate
                // running over capacity rather than dropping live state.
                None => break,
            }
        }
    }
}
