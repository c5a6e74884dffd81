// src/storage/servers.rs
use log::{info, warn};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::models::server::MonitoredServer;

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Download(String),
    Duplicate(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to access server list: {}", e),
            Self::Parse(e) => write!(f, "Invalid server list: {}", e),
            Self::Download(e) => write!(f, "Failed to download server list: {}", e),
            Self::Duplicate(key) => write!(f, "Server {} is already monitored", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The monitored servers, backed by a JSON file.
///
/// The scheduler takes a snapshot at the start of every cycle, so additions
/// and removals take effect on the next cycle.
pub struct ServerList {
    path: PathBuf,
    servers: RwLock<Vec<MonitoredServer>>,
}

impl ServerList {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let servers = read_servers(&path)?;
        info!("Loaded {} servers from {}", servers.len(), path.display());
        Ok(Self {
            path,
            servers: RwLock::new(servers),
        })
    }

    /// An in-memory list; edits and `reload` still target `path`.
    pub fn with_servers(path: impl AsRef<Path>, servers: Vec<MonitoredServer>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            servers: RwLock::new(servers),
        }
    }

    /// Re-reads the backing file. The current list is kept if that fails.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let servers = read_servers(&self.path)?;
        let count = servers.len();
        *self.servers.write() = servers;
        info!("Reloaded {} servers from {}", count, self.path.display());
        Ok(count)
    }

    pub fn snapshot(&self) -> Vec<MonitoredServer> {
        self.servers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Appends `server` and persists the list. Returns its index.
    ///
    /// The file is written before the in-memory list changes, so a failed
    /// write leaves both untouched and a later `reload` cannot undo the edit.
    pub fn add(&self, server: MonitoredServer) -> Result<usize, ConfigError> {
        let mut servers = self.servers.write();
        let key = server.key();
        if servers.iter().any(|s| s.key() == key) {
            return Err(ConfigError::Duplicate(key.to_string()));
        }

        let mut updated = servers.clone();
        updated.push(server);
        write_servers(&self.path, &updated)?;
        *servers = updated;

        info!("Added server {}", key);
        Ok(servers.len() - 1)
    }

    /// Removes by position in the list and persists the result.
    pub fn remove(&self, index: usize) -> Result<Option<MonitoredServer>, ConfigError> {
        let mut servers = self.servers.write();
        if index >= servers.len() {
            warn!("No server at index {}", index);
            return Ok(None);
        }

        let mut updated = servers.clone();
        let server = updated.remove(index);
        write_servers(&self.path, &updated)?;
        *servers = updated;

        info!("Removed server {}", server.key());
        Ok(Some(server))
    }
}

fn write_servers(path: &Path, servers: &[MonitoredServer]) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(servers).map_err(|e| ConfigError::Parse(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))
}

fn read_servers(path: &Path) -> Result<Vec<MonitoredServer>, ConfigError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&data).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Fetches a server list over HTTP and writes it to `path`.
pub async fn download_server_list(url: &str, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| ConfigError::Download(e.to_string()))?
        .error_for_status()
        .map_err(|e| ConfigError::Download(e.to_string()))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| ConfigError::Download(e.to_string()))?;

    // Refuse to overwrite the local file with something we cannot parse.
    serde_json::from_slice::<Vec<MonitoredServer>>(&body).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
    }
    std::fs::write(path.as_ref(), &body).map_err(|e| ConfigError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVERS_JSON: &str = r#"[
        { "type": "UT3Query", "game": "minecraft", "addr": "127.0.0.1", "port": 19132, "channel": 1234 },
        { "type": "SourceQuery", "game": "csgo", "addr": "10.0.0.2", "port": 27015, "channel": 5678, "country": "DE" }
    ]"#;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gsmon-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn loads_and_reloads_from_file() {
        let path = temp_path("load");
        std::fs::write(&path, SERVERS_JSON).unwrap();

        let list = ServerList::load(&path).unwrap();
        let servers = list.snapshot();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].protocol, "UT3Query");
        assert_eq!(servers[0].target, 1234);
        assert_eq!(servers[1].country.as_deref(), Some("DE"));

        std::fs::write(&path, "[]").unwrap();
        assert_eq!(list.reload().unwrap(), 0);
        assert!(list.is_empty());

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(list.reload(), Err(ConfigError::Parse(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn edits_are_persisted() {
        let path = temp_path("edit");
        std::fs::write(&path, SERVERS_JSON).unwrap();
        let list = ServerList::load(&path).unwrap();

        let removed = list.remove(0).unwrap().unwrap();
        assert_eq!(removed.port, 19132);
        assert!(list.remove(5).unwrap().is_none());
        assert_eq!(ServerList::load(&path).unwrap().len(), 1);

        assert_eq!(list.add(removed).unwrap(), 1);
        let reloaded = ServerList::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[1].protocol, "UT3Query");

        // Survives a reload, as a resync would do.
        assert_eq!(list.reload().unwrap(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn duplicate_server_is_rejected() {
        let path = temp_path("duplicate");
        std::fs::write(&path, SERVERS_JSON).unwrap();
        let list = ServerList::load(&path).unwrap();

        let existing = list.snapshot()[1].clone();
        assert!(matches!(list.add(existing), Err(ConfigError::Duplicate(_))));
        assert_eq!(list.len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn failed_write_leaves_list_unchanged() {
        let dir = temp_path("no-such-dir");
        let list = ServerList::with_servers(dir.join("servers.json"), Vec::new());
        let server: Vec<MonitoredServer> = serde_json::from_str(SERVERS_JSON).unwrap();

        assert!(matches!(list.add(server[0].clone()), Err(ConfigError::Io(_))));
        assert!(list.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            ServerList::load(temp_path("missing")),
            Err(ConfigError::Io(_))
        ));
    }
}
