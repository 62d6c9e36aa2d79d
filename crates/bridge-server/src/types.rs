//! Shared types for the bridge server.
//!
//! This module defines:
//! - `OutboundFrame`: frames queued for a connection's writer task
//! - `ConnHandle`: what the watchdog and arbiter task hold per connection
//! - `ArbiterMsg`: everything that funnels into the central arbiter task
//! - channel aliases between the connection tasks, the supervisor and the
//!   arbiter

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bridge_core::arbiter::ConnId;
use bridge_core::command::{ClientCommand, EngineEvent};
use bridge_core::session::SessionId;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Frame queued for a connection's writer task.
#[derive(Debug)]
pub enum OutboundFrame {
    Line(String),
    Ping,
    Pong(Vec<u8>),
    Close,
}

pub type OutboundTx = mpsc::UnboundedSender<OutboundFrame>;
pub type OutboundRx = mpsc::UnboundedReceiver<OutboundFrame>;

/// Per-connection handles shared with the watchdog and the arbiter task.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub out: OutboundTx,
    /// Cancelling tears the connection down through its ordinary
    /// disconnect path.
    pub cancel: CancellationToken,
    /// Set by the watchdog before each probe, cleared by the connection's
    /// reader on pong. Still set at the next tick = expired.
    pub missed_pong: Arc<AtomicBool>,
}

/// Registry of live connections and their outbound channels.
pub type ConnRegistry = Arc<RwLock<HashMap<ConnId, ConnHandle>>>;

/// Message flowing into the central arbiter task.
#[derive(Debug)]
pub enum ArbiterMsg {
    Connected {
        conn: ConnId,
        session: SessionId,
    },
    ClientCommand {
        conn: ConnId,
        cmd: ClientCommand,
        raw: String,
    },
    Disconnected {
        conn: ConnId,
    },
    EngineLine {
        event: EngineEvent,
        raw: String,
    },
    /// The engine process died (or was killed); a replacement is coming.
    EngineExited,
    /// A resource ceiling was breached; the arbiter must force a `stop`.
    CeilingExceeded,
}

pub type ArbiterTx = mpsc::Sender<ArbiterMsg>;
pub type ArbiterRx = mpsc::Receiver<ArbiterMsg>;
