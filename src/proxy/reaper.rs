//! Idle session reaper
//!
//! Periodically evicts sessions that have seen no traffic in either direction
//! for longer than the idle timeout.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::table::SessionTable;

/// Background sweep over the session table
pub struct IdleReaper {
    table: SessionTable,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleReaper {
    /// Create a reaper evicting flows idle for longer than `idle_timeout`,
    /// sweeping every `interval`
    pub fn new(table: SessionTable, idle_timeout: Duration, interval: Duration) -> Self {
        IdleReaper {
            table,
            idle_timeout,
            interval,
        }
    }

    /// Sweep on every tick until shutdown is signalled
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }

        debug!("idle reaper stopped");
    }

    /// Evict every flow idle since before `now - idle_timeout`.
    ///
    /// Candidates are collected from a snapshot first and closed afterwards,
    /// so no table lock is held while sockets are torn down. Returns the
    /// number of sessions evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.idle_timeout) else {
            return 0;
        };

        let expired: Vec<_> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|(_, last_activity)| *last_activity < cutoff)
            .map(|(key, _)| key)
            .collect();

        let evicted = expired
            .iter()
            .filter(|key| self.table.evict_if_idle(key, cutoff))
            .count();

        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.table.len(),
                "idle reaper evicted sessions"
            );
        }
        evicted
    }
}
