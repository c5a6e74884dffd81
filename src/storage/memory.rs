// src/storage/memory.rs
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use std::collections::HashSet;

use crate::models::server::{QueryResult, ServerKey, ServerStatus};
use crate::protocols::QueryError;

/// The fields that decide whether a server is worth re-rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: ServerKey,
    /// Latest known status. Kept after a failed query with the counters zeroed,
    /// so the server's identity can still be shown while it is offline.
    pub result: Option<QueryResult>,
    pub status: ServerStatus,
    pub last_query: u64,
    pub last_error: Option<String>,
    pub fingerprint: Fingerprint,
    #[serde(skip)]
    rendered: Option<Fingerprint>,
}

impl CacheEntry {
    fn new(key: ServerKey) -> Self {
        Self {
            key,
            result: None,
            status: ServerStatus::Offline,
            last_query: 0,
            last_error: None,
            fingerprint: Fingerprint::default(),
            rendered: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ServerStatus::Online
    }

    /// `20/32`, `20 (2)/32` with bots, and `0/32` while offline.
    pub fn players_display(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        let current = if self.is_online() {
            if result.bots > 0 {
                format!("{} ({})", result.players, result.bots)
            } else {
                result.players.to_string()
            }
        } else {
            "0".to_string()
        };
        Some(format!("{}/{}", current, result.max_players))
    }

    fn refresh_fingerprint(&mut self) {
        let online = self.is_online();
        self.fingerprint = match &self.result {
            Some(result) => Fingerprint {
                name: result.name.clone(),
                map: result.map.clone(),
                players: result.players,
                max_players: result.max_players,
                bots: result.bots,
                online,
            },
            None => Fingerprint {
                online,
                ..Fingerprint::default()
            },
        };
    }
}

/// Latest query outcome per server, keyed by configured address and port.
pub struct ServerCache {
    entries: DashMap<ServerKey, CacheEntry>,
}

impl ServerCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Overwrites the entry for `key` with the outcome of one query.
    pub fn store(&self, key: &ServerKey, outcome: Result<QueryResult, QueryError>, timestamp: u64) {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone()));

        entry.last_query = timestamp;
        match outcome {
            Ok(result) => {
                entry.status = ServerStatus::Online;
                entry.result = Some(result);
                entry.last_error = None;
            }
            Err(e) => {
                entry.status = ServerStatus::Offline;
                if let Some(last) = entry.result.as_mut() {
                    last.players = 0;
                    last.bots = 0;
                    last.players_list.clear();
                }
                entry.last_error = Some(e.to_string());
            }
        }
        entry.refresh_fingerprint();
        debug!("Stored {} as {}", key, entry.status);
    }

    /// True when the stored state differs from what was last rendered.
    pub fn has_changed(&self, key: &ServerKey) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.rendered.as_ref() != Some(&entry.fingerprint))
            .unwrap_or(false)
    }

    /// Records that the current state of `key` has been presented.
    pub fn mark_rendered(&self, key: &ServerKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.rendered = Some(entry.fingerprint.clone());
        }
    }

    /// Forgets every rendered fingerprint, forcing the next update of each server.
    pub fn clear_rendered(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.rendered = None;
        }
    }

    pub fn get_snapshot(&self, key: &ServerKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    pub fn snapshots(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Drops entries for servers that are no longer monitored.
    pub fn retain_keys(&self, keys: &HashSet<ServerKey>) {
        self.entries.retain(|key, _| keys.contains(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ServerCache {
    fn default() -> Self {
        Self::new()
    }
}
