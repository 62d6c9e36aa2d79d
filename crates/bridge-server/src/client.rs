//! Per-connection I/O.
//!
//! Each accepted WebSocket gets one reader loop feeding the arbiter's
//! inbox and one writer task draining the connection's outbound queue.
//! The reader suspends on the (bounded) arbiter channel and on network
//! I/O only; it never holds the engine write path, so a slow client
//! cannot block anyone else's `stop`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridge_core::arbiter::ConnId;
use bridge_core::session::SessionId;
use bridge_protocol::client_codec;

use crate::server::AppState;
use crate::types::{ArbiterMsg, ConnHandle, OutboundFrame, OutboundRx, OutboundTx};

pub async fn run(state: Arc<AppState>, socket: WebSocket, conn: ConnId, session: SessionId) {
    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let missed_pong = Arc::new(AtomicBool::new(false));

    state.registry.write().await.insert(
        conn,
        ConnHandle {
            out: out_tx.clone(),
            cancel: cancel.clone(),
            missed_pong: Arc::clone(&missed_pong),
        },
    );
    if state
        .arbiter_tx
        .send(ArbiterMsg::Connected {
            conn,
            session: session.clone(),
        })
        .await
        .is_err()
    {
        state.registry.write().await.remove(&conn);
        return;
    }

    let writer = tokio::spawn(write_frames(sink, out_rx));

    read_messages(&state, stream, conn, &out_tx, &cancel, &missed_pong).await;

    // Deregister first so no further engine output is routed here, then
    // let the arbiter run the implicit stop + release.
    state.registry.write().await.remove(&conn);
    let _ = state
        .arbiter_tx
        .send(ArbiterMsg::Disconnected { conn })
        .await;
    let _ = out_tx.send(OutboundFrame::Close);
    drop(out_tx);
    let _ = writer.await;
    info!(conn = conn.0, %session, "connection closed");
}

async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut rx: OutboundRx) {
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            OutboundFrame::Line(line) => Message::Text(line.into()),
            OutboundFrame::Ping => Message::Ping(Bytes::new()),
            OutboundFrame::Pong(data) => Message::Pong(Bytes::from(data)),
            OutboundFrame::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

async fn read_messages(
    state: &AppState,
    mut stream: SplitStream<WebSocket>,
    conn: ConnId,
    out_tx: &OutboundTx,
    cancel: &CancellationToken,
    missed_pong: &AtomicBool,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(conn = conn.0, "connection expired by watchdog");
                return;
            }
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                match client_codec::parse_client_line(text.as_str()) {
                    // One message, one line: framing violations are
                    // terminal for the connection.
                    Err(err) => {
                        warn!(conn = conn.0, %err, "dropping connection");
                        return;
                    }
                    Ok(None) => continue,
                    Ok(Some(cmd)) => {
                        debug!(conn = conn.0, "<< {}", text.as_str());
                        let msg = ArbiterMsg::ClientCommand {
                            conn,
                            cmd,
                            raw: text.as_str().to_owned(),
                        };
                        if state.arbiter_tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Some(Ok(Message::Pong(_))) => missed_pong.store(false, Ordering::Relaxed),
            Some(Ok(Message::Ping(data))) => {
                let _ = out_tx.send(OutboundFrame::Pong(data.to_vec()));
            }
            Some(Ok(Message::Binary(_))) => {
                warn!(conn = conn.0, "binary messages not supported, dropping connection");
                return;
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(err)) => {
                debug!(conn = conn.0, %err, "socket error");
                return;
            }
        }
    }
}
