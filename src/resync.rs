// src/resync.rs
//! Recovery from a misbehaving presentation sink.
//!
//! Presentation failures are counted; once the threshold is reached (or an
//! operator asks for it) every rendered view is torn down and rebuilt from
//! the cache. The controller is the only writer of the [`SyncState`]
//! channel; the scheduler and the worker only watch it.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::sink::Presenter;
use crate::storage::memory::ServerCache;
use crate::storage::servers::ServerList;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FailureThreshold,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Resyncing(Trigger),
}

impl SyncState {
    pub fn is_resyncing(&self) -> bool {
        matches!(self, Self::Resyncing(_))
    }
}

pub struct ResyncController {
    threshold: u32,
    failures: AtomicU32,
    state: watch::Sender<SyncState>,
}

impl ResyncController {
    pub fn new(threshold: u32) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            threshold: threshold.max(1),
            failures: AtomicU32::new(0),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn is_resyncing(&self) -> bool {
        self.state().is_resyncing()
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Counts one failed presentation update. Returns true if this failure
    /// started a resync.
    pub fn record_failure(&self) -> bool {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Presentation failures: {}/{}", count, self.threshold);
        if count == self.threshold {
            warn!("{} presentation updates failed, requesting a full resync", count);
            self.request(Trigger::FailureThreshold)
        } else {
            false
        }
    }

    /// Successes do not reset the counter; only a completed resync does.
    pub fn record_success(&self) {}

    /// Starts a resync unless one is already pending or running.
    pub fn request(&self, trigger: Trigger) -> bool {
        let started = self.state.send_if_modified(|state| {
            if state.is_resyncing() {
                false
            } else {
                *state = SyncState::Resyncing(trigger);
                true
            }
        });
        if started {
            info!("Resync requested ({:?})", trigger);
        } else {
            debug!("Ignoring resync request ({:?}), one is already in progress", trigger);
        }
        started
    }

    pub fn complete(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.state.send_replace(SyncState::Idle);
    }
}

impl Default for ResyncController {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

/// Performs the rebuild whenever the controller enters `Resyncing`.
pub struct ResyncWorker {
    controller: Arc<ResyncController>,
    presenter: Arc<Mutex<Presenter>>,
    cache: Arc<ServerCache>,
    servers: Arc<ServerList>,
}

impl ResyncWorker {
    pub fn new(
        controller: Arc<ResyncController>,
        presenter: Arc<Mutex<Presenter>>,
        cache: Arc<ServerCache>,
        servers: Arc<ServerList>,
    ) -> Self {
        Self {
            controller,
            presenter,
            cache,
            servers,
        }
    }

    pub async fn run(self) {
        let mut state = self.controller.subscribe();
        loop {
            let trigger = match state.wait_for(SyncState::is_resyncing).await {
                Ok(current) => match *current {
                    SyncState::Resyncing(trigger) => trigger,
                    SyncState::Idle => continue,
                },
                Err(_) => return,
            };
            self.resync(trigger).await;
        }
    }

    /// Discards every rendered view and renders all servers afresh.
    /// Returns how many servers were rendered successfully.
    pub async fn resync(&self, trigger: Trigger) -> usize {
        info!("Starting full resync ({:?})", trigger);

        if let Err(e) = self.servers.reload() {
            warn!("Keeping current server list: {}", e);
        }
        let servers = self.servers.snapshot();

        // Waits for any in-flight poll cycle to finish.
        let mut presenter = self.presenter.lock().await;
        let removed = presenter.clear().await;
        self.cache.clear_rendered();

        let mut rendered = 0;
        for server in &servers {
            let key = server.key();
            let entry = self.cache.get_snapshot(&key);
            match presenter.render(server, entry.as_ref()).await {
                Ok(()) => {
                    if entry.is_some() {
                        self.cache.mark_rendered(&key);
                    }
                    rendered += 1;
                }
                Err(e) => warn!("Failed to render {} during resync: {}", key, e),
            }
        }
        drop(presenter);

        self.controller.complete();
        info!(
            "Resync finished: removed {} views, rendered {}/{} servers",
            removed,
            rendered,
            servers.len()
        );
        rendered
    }
}
