//! WebSocket listener and top-level server wiring.
//!
//! This module:
//! - spawns and probes the engine via the supervisor,
//! - derives the advertised limits and the registration URL,
//! - authenticates inbound connections (constant-time secret check,
//!   rejected with 403 before the upgrade),
//! - assigns each accepted connection a `ConnId` and a session,
//! - spawns the per-connection tasks, the central arbiter task and the
//!   keepalive watchdog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use bridge_core::arbiter::{Arbiter, ConnId};
use bridge_core::filter::CommandFilter;
use bridge_core::session::{SessionId, SessionStore};

use crate::arbiter_task::{self, Deadlines};
use crate::config::Opt;
use crate::registration::{RegistrationSpec, Secret};
use crate::types::{ArbiterTx, ConnRegistry};
use crate::{client, supervisor, watchdog};

/// Shared state behind every request handler.
pub struct AppState {
    pub(crate) secret: Secret,
    pub(crate) arbiter_tx: ArbiterTx,
    pub(crate) registry: ConnRegistry,
    next_conn_id: AtomicU64,
}

#[derive(Deserialize)]
struct ConnectParams {
    secret: Secret,
    session: Option<String>,
}

/// Run the provider with the given options. Only a failure to spawn the
/// engine or to bind the endpoint is fatal.
pub async fn run(opt: Opt) -> anyhow::Result<()> {
    let (arbiter_tx, arbiter_rx) = mpsc::channel(256);

    let (engine, engine_info) =
        supervisor::start(opt.engine.clone(), opt.max_memory_mib, arbiter_tx.clone()).await?;

    let limits = opt.engine_limits(&engine_info);
    let secret = opt
        .secret
        .clone()
        .map(Secret)
        .unwrap_or_else(Secret::generate);
    let name = opt
        .name
        .clone()
        .or_else(|| engine_info.name.clone())
        .unwrap_or_else(|| "engine-bridge".to_owned());
    let spec = RegistrationSpec::new(
        format!("ws://{}/", opt.bind),
        name,
        secret.clone(),
        &limits,
    );

    let registry: ConnRegistry = Arc::new(RwLock::new(HashMap::new()));
    let arbiter = Arbiter::new(
        CommandFilter::new(limits),
        SessionStore::new(opt.session_cap),
    );
    tokio::spawn(arbiter_task::run(
        arbiter_rx,
        Arc::clone(&registry),
        engine,
        arbiter,
        Deadlines {
            search_timeout: opt.search_timeout(),
            stop_grace: opt.stop_grace(),
        },
    ));
    tokio::spawn(watchdog::run(Arc::clone(&registry), opt.ping_interval()));

    let state = Arc::new(AppState {
        secret,
        arbiter_tx,
        registry,
        next_conn_id: AtomicU64::new(1),
    });
    let app = Router::new().route("/", get(ws_handler)).with_state(state);

    let listener = tokio::net::TcpListener::bind(opt.bind)
        .await
        .with_context(|| format!("bind {}", opt.bind))?;
    info!(bind = %opt.bind, "listening");
    println!("{}", spec.registration_url());

    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    if params.secret != state.secret {
        warn!("connection rejected: secret mismatch");
        return Err(StatusCode::FORBIDDEN);
    }
    let conn = ConnId(state.next_conn_id.fetch_add(1, Ordering::Relaxed));
    // A missing session identifier means a disposable one-shot session.
    let session = SessionId(match params.session.filter(|s| !s.is_empty()) {
        Some(session) => session,
        None => format!("anon-{:016x}", rand::random::<u64>()),
    });
    info!(conn = conn.0, %session, "connection accepted");
    Ok(ws.on_upgrade(move |socket| client::run(state, socket, conn, session)))
}
