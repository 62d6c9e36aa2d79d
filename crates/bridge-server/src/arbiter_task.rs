//! Central arbiter loop.
//!
//! This task owns the [`Arbiter`] state machine and is the single point
//! through which every engine write and every routed engine line passes.
//! It never awaits engine I/O (writes go through the supervisor's writer
//! channel), so a pending hand-off can never block a `stop`.
//!
//! It also keeps the wall-clock search ceiling and the stop grace window:
//! a search running past the ceiling gets a forced `stop`; an engine that
//! ignores the `stop` past the grace window is killed and restarted.

use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use bridge_core::arbiter::{Action, Arbiter};

use crate::supervisor::EngineHandle;
use crate::types::{ArbiterMsg, ArbiterRx, ConnRegistry, OutboundFrame};

/// Resource-ceiling timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Cap on a single search's wall-clock time; `None` = unlimited.
    pub search_timeout: Option<Duration>,
    /// How long a forced `stop` may go unanswered before the process is
    /// killed and restarted.
    pub stop_grace: Duration,
}

pub async fn run(
    mut rx: ArbiterRx,
    registry: ConnRegistry,
    engine: EngineHandle,
    mut arbiter: Arbiter,
    deadlines: Deadlines,
) {
    let mut search_deadline: Option<Instant> = None;
    let mut grace_deadline: Option<Instant> = None;

    loop {
        let next_deadline = [search_deadline, grace_deadline]
            .into_iter()
            .flatten()
            .min();
        let msg = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => Some(msg),
                None => break,
            },
            _ = deadline_sleep(next_deadline) => None,
        };

        let actions = match msg {
            Some(ArbiterMsg::Connected { conn, session }) => {
                arbiter.connect(conn, session);
                Vec::new()
            }
            Some(ArbiterMsg::ClientCommand { conn, cmd, raw }) => {
                arbiter.client_command(conn, cmd, &raw)
            }
            Some(ArbiterMsg::Disconnected { conn }) => arbiter.disconnect(conn),
            Some(ArbiterMsg::EngineLine { event, raw }) => arbiter.engine_event(event, &raw),
            Some(ArbiterMsg::EngineExited) => {
                search_deadline = None;
                grace_deadline = None;
                arbiter.engine_crashed()
            }
            Some(ArbiterMsg::CeilingExceeded) => {
                search_deadline = None;
                if grace_deadline.is_none() {
                    grace_deadline = Some(Instant::now() + deadlines.stop_grace);
                }
                arbiter.ceiling_exceeded()
            }
            None => on_deadline(
                &mut arbiter,
                &engine,
                &mut search_deadline,
                &mut grace_deadline,
                deadlines,
            ),
        };

        apply(actions, &registry, &engine).await;

        // Keep the wall-clock ceiling in step with the tracker.
        if arbiter.is_searching() {
            if search_deadline.is_none() && grace_deadline.is_none() {
                search_deadline = deadlines.search_timeout.map(|t| Instant::now() + t);
            }
        } else {
            search_deadline = None;
            grace_deadline = None;
        }
    }
    debug!("arbiter loop shutting down (inbox closed)");
}

fn on_deadline(
    arbiter: &mut Arbiter,
    engine: &EngineHandle,
    search_deadline: &mut Option<Instant>,
    grace_deadline: &mut Option<Instant>,
    deadlines: Deadlines,
) -> Vec<Action> {
    let now = Instant::now();
    if grace_deadline.is_some_and(|d| d <= now) {
        *grace_deadline = None;
        if arbiter.is_searching() {
            error!("engine ignored forced stop, restarting");
            engine.force_restart();
        }
        Vec::new()
    } else if search_deadline.is_some_and(|d| d <= now) {
        *search_deadline = None;
        *grace_deadline = Some(now + deadlines.stop_grace);
        warn!("search exceeded wall-clock ceiling, stopping");
        arbiter.ceiling_exceeded()
    } else {
        Vec::new()
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn apply(actions: Vec<Action>, registry: &ConnRegistry, engine: &EngineHandle) {
    for action in actions {
        match action {
            Action::EngineWrite(line) => {
                info!("engine << {line}");
                engine.write_line(line);
            }
            Action::ClientSend(conn, line) => {
                let guard = registry.read().await;
                if let Some(handle) = guard.get(&conn) {
                    let _ = handle.out.send(OutboundFrame::Line(line));
                }
            }
            Action::Reject(conn, reason) => {
                warn!(conn = conn.0, %reason, "command rejected");
            }
        }
    }
}
