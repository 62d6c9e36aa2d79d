//! Command-line options and derived limits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use bridge_core::filter::EngineLimits;
use clap::Parser;
use sysinfo::System;

use crate::supervisor::EngineInfo;

/// Expose a local UCI engine to remote browser sessions.
#[derive(Debug, Parser)]
#[clap(name = "engine-bridge", version)]
pub struct Opt {
    /// UCI engine executable.
    pub engine: PathBuf,

    /// Bind the provider on this socket address.
    #[clap(long, default_value = "127.0.0.1:9670")]
    pub bind: SocketAddr,

    /// Overwrite the advertised engine name.
    #[clap(long)]
    pub name: Option<String>,

    /// Limit the number of search threads a client may request.
    #[clap(long)]
    pub max_threads: Option<u64>,

    /// Limit the hash table size a client may request (MiB).
    #[clap(long)]
    pub max_hash: Option<u64>,

    /// Shared secret token to use instead of a random one.
    #[clap(long)]
    pub secret: Option<String>,

    /// How many idle sessions to remember engine options for.
    #[clap(long, default_value = "256")]
    pub session_cap: usize,

    /// Keepalive probe interval in seconds.
    #[clap(long, default_value = "10")]
    pub ping_interval_secs: u64,

    /// Abort searches running longer than this many seconds (0 = no limit).
    #[clap(long, default_value = "0")]
    pub search_timeout_secs: u64,

    /// Grace period in seconds before an engine that ignores a forced
    /// `stop` is killed and restarted.
    #[clap(long, default_value = "5")]
    pub stop_grace_secs: u64,

    /// Restart the engine when its resident memory exceeds this many MiB
    /// (0 = no limit).
    #[clap(long, default_value = "0")]
    pub max_memory_mib: u64,
}

impl Opt {
    /// Effective bounds on client-requested options: the strictest of
    /// what the engine declares, what the operator allows, and what the
    /// machine has.
    pub fn engine_limits(&self, info: &EngineInfo) -> EngineLimits {
        EngineLimits {
            max_threads: [
                info.max_threads.unwrap_or(1),
                self.max_threads.unwrap_or(u64::MAX),
                thread::available_parallelism()
                    .map(|n| n.get() as u64)
                    .unwrap_or(1),
            ]
            .into_iter()
            .min()
            .unwrap_or(1),
            max_hash: [
                info.max_hash.unwrap_or(16),
                self.max_hash.unwrap_or(u64::MAX),
                available_memory_mib().next_power_of_two() / 2,
            ]
            .into_iter()
            .min()
            .unwrap_or(16),
            variants: info.variants.clone(),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn search_timeout(&self) -> Option<Duration> {
        (self.search_timeout_secs > 0).then(|| Duration::from_secs(self.search_timeout_secs))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs.max(1))
    }
}

/// Available memory in MiB, never reported below 16 so the hash bound
/// stays usable on constrained machines.
fn available_memory_mib() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    (sys.available_memory() / (1024 * 1024)).max(16)
}
