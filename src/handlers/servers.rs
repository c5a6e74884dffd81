// src/handlers/servers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::json;

use crate::handlers::resync::KeyedLimiter;
use crate::models::server::{MonitoredServer, ServerKey, ServerStatus};
use crate::protocols::ProtocolRegistry;
use crate::resync::{ResyncController, Trigger};
use crate::storage::memory::{CacheEntry, ServerCache};
use crate::storage::servers::{ConfigError, ServerList};
use crate::utils::{extract_peer_ip, RequestError};

/// Per-IP limiter for the server list edit routes.
pub struct ServerEditLimiter(pub KeyedLimiter);

#[derive(Serialize)]
struct ServerSummary {
    id: usize,
    protocol: String,
    key: ServerKey,
    status: Option<ServerStatus>,
    players: Option<String>,
    snapshot: Option<CacheEntry>,
}

/// Lists every monitored server with its latest cached state.
pub async fn get_servers(
    servers: web::Data<ServerList>,
    cache: web::Data<ServerCache>,
) -> HttpResponse {
    let summaries: Vec<ServerSummary> = servers
        .snapshot()
        .into_iter()
        .enumerate()
        .map(|(i, server)| {
            let key = server.key();
            let snapshot = cache.get_snapshot(&key);
            ServerSummary {
                id: i,
                protocol: server.protocol,
                key,
                status: snapshot.as_ref().map(|s| s.status),
                players: snapshot.as_ref().and_then(CacheEntry::players_display),
                snapshot,
            }
        })
        .collect();

    debug!("Building server list response with {} servers", summaries.len());
    HttpResponse::Ok().json(summaries)
}

fn check_rate(req: &HttpRequest, limiter: &ServerEditLimiter) -> Result<(), RequestError> {
    let peer_ip = extract_peer_ip(req)?;
    if limiter.0.check_key(&peer_ip).is_err() {
        error!("Rate limit exceeded for server edit for ip: {}", peer_ip);
        return Err(RequestError::RateLimitExceeded);
    }
    Ok(())
}

fn storage_error(e: ConfigError) -> RequestError {
    match e {
        ConfigError::Duplicate(key) => RequestError::DuplicateServer(key),
        other => {
            error!("{}", other);
            RequestError::Storage(other.to_string())
        }
    }
}

/// Rebuilds the views so an added or removed server shows up right away.
fn refresh(controller: &ResyncController) -> bool {
    let started = controller.request(Trigger::Admin);
    if !started {
        debug!("Resync already running, the edit is picked up by the next poll cycle");
    }
    started
}

/// Starts monitoring a server and persists the list.
pub async fn add_server(
    req: HttpRequest,
    server: web::Json<MonitoredServer>,
    servers: web::Data<ServerList>,
    registry: web::Data<ProtocolRegistry>,
    controller: web::Data<ResyncController>,
    rate_limiter: web::Data<ServerEditLimiter>,
) -> Result<HttpResponse, RequestError> {
    check_rate(&req, &rate_limiter)?;

    let server = server.into_inner();
    if registry.resolve(&server.protocol).is_err() {
        return Err(RequestError::UnknownProtocol(server.protocol));
    }

    let key = server.key();
    let id = servers.add(server).map_err(storage_error)?;
    info!("Server {} added as id {}", key, id);

    Ok(HttpResponse::Created().json(json!({
        "id": id,
        "key": key,
        "resync": refresh(&controller),
    })))
}

/// Stops monitoring the server at `id` (its position in `GET /servers`).
pub async fn delete_server(
    req: HttpRequest,
    path: web::Path<usize>,
    servers: web::Data<ServerList>,
    controller: web::Data<ResyncController>,
    rate_limiter: web::Data<ServerEditLimiter>,
) -> Result<HttpResponse, RequestError> {
    check_rate(&req, &rate_limiter)?;

    let id = path.into_inner();
    let removed = servers
        .remove(id)
        .map_err(storage_error)?
        .ok_or(RequestError::ServerNotFound(id))?;
    info!("Server {} (id {}) removed", removed.key(), id);

    Ok(HttpResponse::Ok().json(json!({
        "removed": removed,
        "resync": refresh(&controller),
    })))
}
