//! Keepalive watchdog.
//!
//! Probes every open connection on a fixed interval and expires the ones
//! that did not answer the previous probe. Runs independently of the
//! message path, so a slow or dead connection cannot stall the others.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

use crate::types::{ConnRegistry, OutboundFrame};

pub async fn run(registry: ConnRegistry, period: Duration) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately.
    tick.tick().await;

    loop {
        tick.tick().await;
        let snapshot: Vec<_> = {
            let guard = registry.read().await;
            guard
                .iter()
                .map(|(conn, handle)| (*conn, handle.clone()))
                .collect()
        };
        for (conn, handle) in snapshot {
            if handle.missed_pong.swap(true, Ordering::Relaxed) {
                warn!(conn = conn.0, "keepalive timeout, expiring connection");
                handle.cancel.cancel();
            } else {
                let _ = handle.out.send(OutboundFrame::Ping);
            }
        }
    }
}
