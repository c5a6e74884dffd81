// src/protocols/registry.rs
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

use super::{QueryClient, QueryError, SourceQuery, Ut3Query};

/// Maps the `type` field of a server entry to the client that speaks it.
///
/// Populated at startup and then used read-only by the scheduler.
pub struct ProtocolRegistry {
    clients: HashMap<String, Arc<dyn QueryClient>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Registry with every built-in protocol.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let ut3: Arc<dyn QueryClient> = Arc::new(Ut3Query::new());
        registry.register("GS4Query", Arc::clone(&ut3));
        registry.register(ut3.name(), ut3);
        let source: Arc<dyn QueryClient> = Arc::new(SourceQuery::new());
        registry.register(source.name(), source);
        registry
    }

    pub fn register(&mut self, id: &str, client: Arc<dyn QueryClient>) {
        info!("Registered query protocol {}", id);
        self.clients.insert(id.to_string(), client);
    }

    /// Looks up a client. An unknown id is a configuration error, not worth retrying.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn QueryClient>, QueryError> {
        self.clients
            .get(id)
            .cloned()
            .ok_or_else(|| QueryError::UnknownProtocol(id.to_string()))
    }

    pub fn protocols(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
