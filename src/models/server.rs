// src/models/server.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A game server listed in the server list file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredServer {
    #[serde(rename = "type")]
    pub protocol: String,
    #[serde(default)]
    pub game: String,
    pub addr: String,
    pub port: u16,
    /// Opaque downstream target (where the rendered view is posted).
    #[serde(rename = "channel")]
    pub target: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl MonitoredServer {
    pub fn key(&self) -> ServerKey {
        ServerKey::new(&self.addr, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerKey {
    pub addr: String,
    pub port: u16,
}

impl ServerKey {
    pub fn new(addr: &str, port: u16) -> Self {
        Self {
            addr: addr.to_string(),
            port,
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Normalized status returned by any query protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub name: String,
    pub map: String,
    pub game: String,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub password: bool,
    /// Address and port as reported by the server itself.
    pub addr: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players_list: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rules: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Online,
    Offline,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}
