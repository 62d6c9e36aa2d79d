//! Engine process supervisor.
//!
//! Owns the lifecycle of the engine subprocess: spawn, the startup `uci`
//! probe, a dedicated writer task for stdin (single writer, so all engine
//! writes are totally ordered) and a dedicated reader task for stdout,
//! crash detection and respawn, and optional resident-memory sampling.
//!
//! The rest of the system talks to the process only through
//! [`EngineHandle`]; output lines arrive at the arbiter task as
//! [`ArbiterMsg::EngineLine`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use sysinfo::{Pid, System};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_core::command::EngineEvent;
use bridge_protocol::engine_codec;

use crate::types::{ArbiterMsg, ArbiterTx};

/// What the startup probe learned about the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineInfo {
    pub name: Option<String>,
    pub max_threads: Option<u64>,
    pub max_hash: Option<u64>,
    pub variants: Vec<String>,
}

/// Orders from the arbiter task to the supervisor.
#[derive(Debug)]
pub enum EngineControl {
    /// Kill the current process and bring up a fresh one.
    Restart,
}

/// Cheap cloneable handle for talking to the supervised process.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    write_tx: mpsc::UnboundedSender<String>,
    control_tx: mpsc::UnboundedSender<EngineControl>,
}

impl EngineHandle {
    /// Queue one line for the engine's stdin. Ordering is total: every
    /// write funnels through the single writer task.
    pub fn write_line(&self, line: String) {
        let _ = self.write_tx.send(line);
    }

    pub fn force_restart(&self) {
        let _ = self.control_tx.send(EngineControl::Restart);
    }
}

/// Spawn the engine, probe it, and hand the pipes to the supervisor task.
pub async fn start(
    path: PathBuf,
    max_memory_mib: u64,
    arbiter_tx: ArbiterTx,
) -> anyhow::Result<(EngineHandle, EngineInfo)> {
    let (child, mut stdin, mut stdout) =
        spawn(&path).with_context(|| format!("spawn engine {}", path.display()))?;

    let info = tokio::time::timeout(Duration::from_secs(10), probe(&mut stdin, &mut stdout))
        .await
        .context("engine did not answer the uci probe in time")?
        .context("probe engine")?;
    info!(
        name = info.name.as_deref().unwrap_or("<unnamed>"),
        "engine ready"
    );

    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let pid = Arc::new(AtomicU32::new(child.id().unwrap_or(0)));

    if max_memory_mib > 0 {
        tokio::spawn(sample_memory(
            Arc::clone(&pid),
            max_memory_mib,
            arbiter_tx.clone(),
        ));
    }

    tokio::spawn(supervise(
        path, child, stdin, stdout, write_rx, control_rx, arbiter_tx, pid,
    ));

    Ok((
        EngineHandle {
            write_tx,
            control_tx,
        },
        info,
    ))
}

type EngineStdin = BufWriter<ChildStdin>;
type EngineStdout = Lines<BufReader<ChildStdout>>;

fn spawn(path: &Path) -> io::Result<(Child, EngineStdin, EngineStdout)> {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin closed"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdout closed"))?;
    Ok((
        child,
        BufWriter::new(stdin),
        BufReader::new(stdout).lines(),
    ))
}

/// `uci` … `uciok`: collect the engine's identity and option declarations
/// to derive the bounds advertised at registration.
async fn probe(stdin: &mut EngineStdin, stdout: &mut EngineStdout) -> io::Result<EngineInfo> {
    write_line(stdin, "uci").await?;
    let mut info = EngineInfo::default();
    while let Some(line) = stdout.next_line().await? {
        match engine_codec::parse_engine_line(&line) {
            EngineEvent::IdName(name) => info.name = Some(name),
            EngineEvent::OptionDecl(decl) => {
                if decl.name == "Threads" {
                    info.max_threads = decl.max.and_then(|v| u64::try_from(v).ok());
                } else if decl.name == "Hash" {
                    info.max_hash = decl.max.and_then(|v| u64::try_from(v).ok());
                } else if decl.name == "UCI_Variant" {
                    info.variants = decl.vars;
                }
            }
            EngineEvent::Uciok => return Ok(info),
            _ => (),
        }
    }
    Err(io::ErrorKind::UnexpectedEof.into())
}

async fn write_line(stdin: &mut EngineStdin, line: &str) -> io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\r\n").await?;
    stdin.flush().await
}

/// Supervision loop: one iteration per process incarnation.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    path: PathBuf,
    mut child: Child,
    stdin: EngineStdin,
    stdout: EngineStdout,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    arbiter_tx: ArbiterTx,
    pid: Arc<AtomicU32>,
) {
    let mut crashes: u64 = 0;
    let mut stdin = Some(stdin);
    let mut stdout = Some(stdout);

    loop {
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(
            write_rx,
            stdin.take().expect("stdin present per incarnation"),
            cancel.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            stdout.take().expect("stdout present per incarnation"),
            arbiter_tx.clone(),
        ));

        // Wait for the process to die, or for an ordered restart.
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => warn!(%status, "engine process exited"),
                Err(err) => error!(%err, "waiting on engine process failed"),
            },
            Some(EngineControl::Restart) = control_rx.recv() => {
                warn!("killing unresponsive engine process");
                if let Err(err) = child.kill().await {
                    error!(%err, "killing engine process failed");
                }
            }
        }

        cancel.cancel();
        let Ok(mut reclaimed) = writer.await else {
            return;
        };
        let _ = reader.await;

        // Anything still queued was meant for the dead process; commands
        // written after the crash notification below target the fresh one.
        while reclaimed.try_recv().is_ok() {}
        write_rx = reclaimed;

        crashes += 1;
        if arbiter_tx.send(ArbiterMsg::EngineExited).await.is_err() {
            return;
        }

        // Respawn, retrying for as long as the provider lives.
        loop {
            match spawn(&path) {
                Ok((new_child, new_stdin, new_stdout)) => {
                    child = new_child;
                    pid.store(child.id().unwrap_or(0), Ordering::Relaxed);
                    stdin = Some(new_stdin);
                    stdout = Some(new_stdout);
                    info!(crashes, "engine process restarted");
                    break;
                }
                Err(err) => {
                    error!(%err, "engine respawn failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }
}

/// Single writer for the engine's stdin. Returns its receiver so the
/// supervisor can carry queued state over to the next incarnation.
async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut stdin: EngineStdin,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<String> {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if let Err(err) = write_line(&mut stdin, &line).await {
            warn!(%err, "engine stdin write failed");
            // Park until the supervisor reclaims the receiver; lines
            // queued for a dead process must not be consumed here.
            cancel.cancelled().await;
            break;
        }
    }
    rx
}

/// Single reader for the engine's stdout.
async fn read_loop(mut stdout: EngineStdout, arbiter_tx: ArbiterTx) {
    loop {
        match stdout.next_line().await {
            Ok(Some(line)) => {
                let event = engine_codec::parse_engine_line(&line);
                match event {
                    EngineEvent::Info => debug!("engine >> {line}"),
                    _ => info!("engine >> {line}"),
                }
                if arbiter_tx
                    .send(ArbiterMsg::EngineLine { event, raw: line })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            // EOF or broken pipe: the supervisor notices via wait().
            Ok(None) => return,
            Err(err) => {
                warn!(%err, "engine stdout read failed");
                return;
            }
        }
    }
}

/// Periodic resident-memory check against the configured ceiling.
async fn sample_memory(pid: Arc<AtomicU32>, ceiling_mib: u64, arbiter_tx: ArbiterTx) {
    let mut sys = System::new();
    let mut tick = tokio::time::interval(Duration::from_secs(2));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let raw = pid.load(Ordering::Relaxed);
        if raw == 0 {
            continue;
        }
        let pid = Pid::from_u32(raw);
        if !sys.refresh_process(pid) {
            continue;
        }
        let Some(process) = sys.process(pid) else {
            continue;
        };
        let rss_mib = process.memory() / (1024 * 1024);
        if rss_mib > ceiling_mib {
            warn!(rss_mib, ceiling_mib, "engine memory ceiling exceeded");
            if arbiter_tx.send(ArbiterMsg::CeilingExceeded).await.is_err() {
                return;
            }
        }
    }
}
