//! Per-user accounting (C6's counters) and the periodic reporter (C8).
//!
//! Counters are plain atomics behind a `DashMap` keyed by user name — per
//! spec §5, no cross-field atomicity is required, only monotonic
//! increment/decrement and last-write-wins reads, so there is no need for a
//! lock around the whole record the way a naive `Mutex<Counter>` would need.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

/// One user's live counters. `current_connections_x2` is tracked doubled
/// (spec §4.5/§3): each session's two relay workers each bump it by one, so
/// it naturally settles back to zero when both exit, and the reporter
/// halves it for display.
#[derive(Default)]
pub struct UserStats {
    pub connects: AtomicU64,
    pub current_connections_x2: AtomicU64,
    pub octets_forwarded: AtomicU64,
}

#[derive(Clone, Default)]
pub struct StatsRegistry {
    inner: Arc<DashMap<String, Arc<UserStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures an entry exists for every configured user (so the reporter
    /// shows zeroed rows for users who never connected, not just silence).
    pub fn register_users<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.inner.entry(name.to_string()).or_default();
        }
    }

    fn entry(&self, user: &str) -> Arc<UserStats> {
        self.inner
            .entry(user.to_string())
            .or_default()
            .value()
            .clone()
    }

    pub fn record_connect(&self, user: &str) {
        self.entry(user).connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self, user: &str) {
        self.entry(user)
            .current_connections_x2
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self, user: &str) {
        self.entry(user)
            .current_connections_x2
            .fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_octets(&self, user: &str, n: u64) {
        self.entry(user)
            .octets_forwarded
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Read-only snapshot for the reporter; need not be atomic across users
    /// (spec §4.7).
    pub fn snapshot(&self) -> Vec<(String, u64, u64, u64)> {
        self.inner
            .iter()
            .map(|entry| {
                let stats = entry.value();
                (
                    entry.key().clone(),
                    stats.connects.load(Ordering::Relaxed),
                    stats.current_connections_x2.load(Ordering::Relaxed) / 2,
                    stats.octets_forwarded.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

/// Periodic task: log one line per user every `period`, matching the
/// reference implementation's stats printer.
pub async fn run_stats_reporter(stats: StatsRegistry, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        let now = chrono::Local::now().format("%d.%m.%Y %H:%M:%S");
        info!(target: "telemt::stats", "stats for {now}");
        for (user, connects, current, octets) in stats.snapshot() {
            info!(
                target: "telemt::stats",
                "{user}: {connects} connects ({current} current), {:.2} MB",
                octets as f64 / 1_000_000.0
            );
        }
    }
}
