// src/scheduler.rs
//! Fixed-cadence poll cycles over every monitored server.

use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::models::server::{MonitoredServer, QueryResult, ServerKey};
use crate::protocols::{ProtocolRegistry, QueryError};
use crate::resync::{ResyncController, SyncState};
use crate::sink::Presenter;
use crate::storage::memory::ServerCache;
use crate::storage::servers::ServerList;
use crate::utils::now_secs;

/// Longest supported cycle interval. Keeps due-time arithmetic in range.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Tracks when the next cycle is due as an absolute instant.
///
/// Each due time is derived from the previous one, so time spent polling does
/// not stretch the period. Periods missed by an overrun are skipped, never
/// replayed back to back.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Cadence {
    pub fn new(configured: Duration, floor: Duration) -> Self {
        Self {
            interval: configured
                .max(floor)
                .clamp(Duration::from_millis(1), MAX_INTERVAL),
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.map_or(true, |due| now >= due)
    }

    /// Moves the due time past `now` and returns it.
    pub fn advance(&mut self, now: Instant) -> Instant {
        let next = match self.next_due {
            Some(due) if due + self.interval > now => due + self.interval,
            Some(due) => {
                // Below `MAX_INTERVAL` the remainder always fits in u64 nanos.
                let behind = now.saturating_duration_since(due).as_nanos() % self.interval.as_nanos();
                let behind = Duration::from_nanos(u64::try_from(behind).unwrap_or(0));
                now + (self.interval - behind)
            }
            None => now + self.interval,
        };
        self.next_due = Some(next);
        next
    }
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub queried: usize,
    pub online: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A resync owns the presentation state.
    Suspended,
    NotDue,
    Polled(CycleReport),
}

pub struct PollScheduler {
    cadence: Cadence,
    query_timeout: Duration,
    registry: Arc<ProtocolRegistry>,
    cache: Arc<ServerCache>,
    servers: Arc<ServerList>,
    presenter: Arc<Mutex<Presenter>>,
    controller: Arc<ResyncController>,
    sync_state: watch::Receiver<SyncState>,
}

impl PollScheduler {
    pub fn new(
        cadence: Cadence,
        query_timeout: Duration,
        registry: Arc<ProtocolRegistry>,
        cache: Arc<ServerCache>,
        servers: Arc<ServerList>,
        presenter: Arc<Mutex<Presenter>>,
        controller: Arc<ResyncController>,
    ) -> Self {
        let sync_state = controller.subscribe();
        Self {
            cadence,
            query_timeout,
            registry,
            cache,
            servers,
            presenter,
            controller,
            sync_state,
        }
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    /// Runs forever, checking once per `quantum` whether a cycle is due.
    pub async fn run(mut self, quantum: Duration) {
        info!("Query servers every {} seconds", self.cadence.interval().as_secs());

        let mut ticker = tokio::time::interval(quantum);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let TickOutcome::Polled(report) = self.tick(Instant::now()).await {
                info!(
                    "Poll cycle done: {}/{} online, {} updated, {} failed updates",
                    report.online, report.queried, report.updated, report.failed
                );
            }
        }
    }

    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.sync_state.borrow().is_resyncing() {
            debug!("Resync in progress, skipping tick");
            return TickOutcome::Suspended;
        }
        if !self.cadence.is_due(now) {
            return TickOutcome::NotDue;
        }
        self.cadence.advance(now);
        TickOutcome::Polled(self.poll_cycle().await)
    }

    async fn poll_cycle(&self) -> CycleReport {
        let servers = self.servers.snapshot();
        let keys: HashSet<ServerKey> = servers.iter().map(MonitoredServer::key).collect();
        self.cache.retain_keys(&keys);

        // Held for the whole cycle so a rebuild never sees half-written state.
        let mut presenter = self.presenter.lock().await;

        let mut report = CycleReport {
            queried: servers.len(),
            ..CycleReport::default()
        };

        let mut queries = JoinSet::new();
        for server in &servers {
            let key = server.key();
            let client = self.registry.resolve(&server.protocol);
            let cache = Arc::clone(&self.cache);
            let addr = server.addr.clone();
            let port = server.port;
            let timeout = self.query_timeout;

            queries.spawn(async move {
                let outcome = match client {
                    // The client bounds each read; this also bounds name resolution.
                    Ok(client) => tokio::time::timeout(
                        timeout.saturating_mul(2),
                        client.query(&addr, port, timeout),
                    )
                    .await
                    .unwrap_or(Err(QueryError::Timeout)),
                    Err(e) => Err(e),
                };
                log_outcome(&key, &outcome);
                let online = outcome.is_ok();
                cache.store(&key, outcome, now_secs());
                online
            });
        }
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok(true) => report.online += 1,
                Ok(false) => {}
                Err(e) => error!("Query task failed: {}", e),
            }
        }

        for server in &servers {
            if self.controller.is_resyncing() {
                debug!("Resync requested, leaving remaining updates to it");
                break;
            }

            let key = server.key();
            if !self.cache.has_changed(&key) {
                continue;
            }
            let entry = self.cache.get_snapshot(&key);
            match presenter.render(server, entry.as_ref()).await {
                Ok(()) => {
                    self.cache.mark_rendered(&key);
                    self.controller.record_success();
                    report.updated += 1;
                }
                Err(e) => {
                    warn!("Failed to update view for {}: {}", key, e);
                    report.failed += 1;
                    self.controller.record_failure();
                }
            }
        }

        report
    }
}

fn log_outcome(key: &ServerKey, outcome: &Result<QueryResult, QueryError>) {
    match outcome {
        Ok(result) => debug!(
            "{} is online: {} on {} ({}/{})",
            key, result.name, result.map, result.players, result.max_players
        ),
        Err(QueryError::Timeout) => debug!("{} did not answer", key),
        Err(e @ QueryError::UnknownProtocol(_)) => error!("{}: {}", key, e),
        Err(e) => warn!("{}: {}", key, e),
    }
}
