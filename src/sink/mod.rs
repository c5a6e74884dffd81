// src/sink/mod.rs
pub mod stdout;
pub mod webhook;

use async_trait::async_trait;
use log::debug;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::models::server::{MonitoredServer, ServerKey, ServerStatus};
use crate::storage::memory::CacheEntry;

pub use self::stdout::StdoutSink;
pub use self::webhook::WebhookSink;

/// Opaque id of something the sink has rendered (a message id, for example).
pub type RenderHandle = String;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    EditFailed(String),
    Transport(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EditFailed(reason) => write!(f, "Presentation update rejected: {}", reason),
            Self::Transport(reason) => write!(f, "Presentation sink unreachable: {}", reason),
        }
    }
}

impl std::error::Error for SinkError {}

/// Where server views end up.
#[async_trait]
pub trait PresentationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn post(&self, target: u64, view: &ServerView) -> Result<RenderHandle, SinkError>;

    async fn edit(&self, handle: &RenderHandle, view: &ServerView) -> Result<(), SinkError>;

    async fn delete(&self, handle: &RenderHandle) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Fullness {
    Full,
    Busy,
    Open,
    Offline,
    Unreachable,
}

/// Display-ready summary of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerView {
    pub title: String,
    /// `None` when the server has never answered a query.
    pub status: Option<ServerStatus>,
    pub address: String,
    pub game: String,
    pub map: String,
    pub players: String,
    pub fullness: Fullness,
    pub description: Option<String>,
    pub country: Option<String>,
}

impl ServerView {
    pub fn build(server: &MonitoredServer, entry: Option<&CacheEntry>) -> Self {
        let last = entry.and_then(|e| e.result.as_ref().map(|result| (e, result)));

        match last {
            Some((entry, result)) => {
                let fullness = if !entry.is_online() {
                    Fullness::Offline
                } else if result.max_players <= result.players {
                    Fullness::Full
                } else if result.max_players <= result.players * 2 {
                    Fullness::Busy
                } else {
                    Fullness::Open
                };
                let lock = if result.password { "\u{1F512} " } else { "" };

                Self {
                    title: format!("{}{}", lock, result.name),
                    status: Some(entry.status),
                    address: format!("{}:{}", result.addr, result.port),
                    game: result.game.clone(),
                    map: result.map.clone(),
                    players: entry.players_display().unwrap_or_default(),
                    fullness,
                    description: server.custom.clone(),
                    country: server.country.clone(),
                }
            }
            None => Self {
                title: "ERROR".to_string(),
                status: None,
                address: server.key().to_string(),
                game: server.game.clone(),
                map: String::new(),
                players: String::new(),
                fullness: Fullness::Unreachable,
                description: server.custom.clone(),
                country: server.country.clone(),
            },
        }
    }

    pub fn to_text(&self) -> String {
        let mut text = self.title.clone();
        if let Some(description) = &self.description {
            text.push('\n');
            text.push_str(description);
        }
        match self.status {
            Some(status) => {
                text.push_str(&format!("\nStatus: {}", status));
                text.push_str(&format!("\nAddress: {}", self.address));
                if let Some(country) = &self.country {
                    text.push_str(&format!("\nCountry: {}", country));
                }
                text.push_str(&format!("\nGame: {}", self.game));
                text.push_str(&format!("\nMap: {}", self.map));
                text.push_str(&format!("\nPlayers: {}", self.players));
            }
            None => {
                text.push_str("\nStatus: Fail to query");
                text.push_str(&format!("\nAddress: {}", self.address));
            }
        }
        text
    }
}

/// Keeps one rendered view per server and throttles calls into the sink.
pub struct Presenter {
    sink: Arc<dyn PresentationSink>,
    handles: HashMap<ServerKey, RenderHandle>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl Presenter {
    pub fn new(sink: Arc<dyn PresentationSink>, quota: Quota) -> Self {
        Self {
            sink,
            handles: HashMap::new(),
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn handles(&self) -> usize {
        self.handles.len()
    }

    /// Posts the first view of a server, edits it afterwards.
    pub async fn render(&mut self, server: &MonitoredServer, entry: Option<&CacheEntry>) -> Result<(), SinkError> {
        let view = ServerView::build(server, entry);
        let key = server.key();

        self.limiter.until_ready().await;
        match self.handles.get(&key) {
            Some(handle) => self.sink.edit(handle, &view).await,
            None => {
                let handle = self.sink.post(server.target, &view).await?;
                self.handles.insert(key, handle);
                Ok(())
            }
        }
    }

    /// Deletes every tracked view. Failures are ignored, the handles are dropped either way.
    pub async fn clear(&mut self) -> usize {
        let handles: Vec<(ServerKey, RenderHandle)> = self.handles.drain().collect();
        for (key, handle) in &handles {
            self.limiter.until_ready().await;
            if let Err(e) = self.sink.delete(handle).await {
                debug!("Could not delete view for {}: {}", key, e);
            }
        }
        handles.len()
    }
}
