// src/utils.rs
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use log::debug;
use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub enum RequestError {
    MissingPeerIP,
    RateLimitExceeded,
    ResyncInProgress,
    UnknownProtocol(String),
    DuplicateServer(String),
    ServerNotFound(usize),
    Storage(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPeerIP => write!(f, "Failed to extract client IP"),
            Self::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            Self::ResyncInProgress => write!(f, "A resync is already in progress"),
            Self::UnknownProtocol(id) => write!(f, "Unknown protocol: {}", id),
            Self::DuplicateServer(key) => write!(f, "Server {} is already monitored", key),
            Self::ServerNotFound(id) => write!(f, "No server with id {}", id),
            Self::Storage(e) => write!(f, "Failed to update server list: {}", e),
        }
    }
}

impl ResponseError for RequestError {
    fn error_response(&self) -> HttpResponse {
        match self {
            Self::RateLimitExceeded => HttpResponse::TooManyRequests().body(self.to_string()),
            Self::ResyncInProgress => HttpResponse::Conflict().body(self.to_string()),
            Self::MissingPeerIP | Self::UnknownProtocol(_) => HttpResponse::BadRequest().body(self.to_string()),
            Self::DuplicateServer(_) => HttpResponse::Conflict().body(self.to_string()),
            Self::ServerNotFound(_) => HttpResponse::NotFound().body(self.to_string()),
            Self::Storage(_) => HttpResponse::InternalServerError().body(self.to_string()),
        }
    }
}

pub fn extract_peer_ip(req: &HttpRequest) -> Result<IpAddr, RequestError> {
    let peer = req.peer_addr().ok_or(RequestError::MissingPeerIP)?;
    debug!("Admin request from {}", peer);
    Ok(peer.ip())
}

/// Seconds since the unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
