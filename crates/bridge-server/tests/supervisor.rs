//! Supervisor tests against a scripted fake engine.
//!
//! The fake engine is a tiny shell script speaking just enough UCI for
//! the probe and for exercising the crash/restart path.

#![cfg(unix)]

use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use bridge_core::command::EngineEvent;
use bridge_server::supervisor;
use bridge_server::types::{ArbiterMsg, ArbiterRx};

const FAKE_ENGINE: &str = r#"#!/bin/sh
while IFS= read -r line; do
    case "$line" in
        uci*)
            printf 'id name FakeFish\n'
            printf 'option name Threads type spin default 1 min 1 max 8\n'
            printf 'option name Hash type spin default 16 min 1 max 64\n'
            printf 'uciok\n'
            ;;
        isready*) printf 'readyok\n' ;;
        go*) printf 'bestmove e2e4\n' ;;
        quit*) exit 0 ;;
    esac
done
"#;

fn fake_engine() -> tempfile::TempPath {
    let mut file = tempfile::NamedTempFile::new().expect("create fake engine");
    file.write_all(FAKE_ENGINE.as_bytes())
        .expect("write fake engine");
    let path = file.into_temp_path();
    let mut perms = std::fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

/// Wait for the next engine output line, skipping other arbiter traffic.
async fn next_engine_line(rx: &mut ArbiterRx) -> (EngineEvent, String) {
    loop {
        let msg = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("engine output in time")
            .expect("channel open");
        if let ArbiterMsg::EngineLine { event, raw } = msg {
            return (event, raw);
        }
    }
}

async fn next_exit(rx: &mut ArbiterRx) {
    loop {
        let msg = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("exit notification in time")
            .expect("channel open");
        if matches!(msg, ArbiterMsg::EngineExited) {
            return;
        }
    }
}

#[tokio::test]
async fn probe_collects_identity_and_limits() {
    let script = fake_engine();
    let (tx, _rx) = mpsc::channel(64);

    let (_engine, info) = supervisor::start(script.to_path_buf(), 0, tx)
        .await
        .expect("start supervisor");

    assert_eq!(info.name.as_deref(), Some("FakeFish"));
    assert_eq!(info.max_threads, Some(8));
    assert_eq!(info.max_hash, Some(64));
    assert!(info.variants.is_empty());
}

#[tokio::test]
async fn lines_flow_both_ways() {
    let script = fake_engine();
    let (tx, mut rx) = mpsc::channel(64);

    let (engine, _info) = supervisor::start(script.to_path_buf(), 0, tx)
        .await
        .expect("start supervisor");

    engine.write_line("isready".to_owned());
    let (event, raw) = next_engine_line(&mut rx).await;
    assert_eq!(event, EngineEvent::Readyok);
    assert_eq!(raw, "readyok");

    engine.write_line("go depth 1".to_owned());
    let (event, raw) = next_engine_line(&mut rx).await;
    assert_eq!(event, EngineEvent::Bestmove);
    assert_eq!(raw, "bestmove e2e4");
}

#[tokio::test]
async fn crash_is_reported_and_the_engine_respawns() {
    let script = fake_engine();
    let (tx, mut rx) = mpsc::channel(64);

    let (engine, _info) = supervisor::start(script.to_path_buf(), 0, tx)
        .await
        .expect("start supervisor");

    // The filter never lets a client do this; driving the pipe directly
    // simulates an engine dying on its own.
    engine.write_line("quit".to_owned());
    next_exit(&mut rx).await;

    // Writes queued after the exit notification land on the replacement.
    engine.write_line("isready".to_owned());
    let (event, _) = next_engine_line(&mut rx).await;
    assert_eq!(event, EngineEvent::Readyok);
}
