// src/handlers/resync.rs
use actix_web::{web, HttpRequest, HttpResponse};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use log::{error, info};
use serde_json::json;
use std::net::IpAddr;

use crate::resync::{ResyncController, Trigger};
use crate::utils::{extract_peer_ip, RequestError};

pub type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Explicit, out-of-band resync.
pub async fn request_resync(
    req: HttpRequest,
    controller: web::Data<ResyncController>,
    rate_limiter: web::Data<KeyedLimiter>,
) -> Result<HttpResponse, RequestError> {
    let peer_ip = extract_peer_ip(&req)?;

    if rate_limiter.check_key(&peer_ip).is_err() {
        error!("Rate limit exceeded for resync for ip: {}", peer_ip);
        return Err(RequestError::RateLimitExceeded);
    }

    if !controller.request(Trigger::Admin) {
        return Err(RequestError::ResyncInProgress);
    }

    info!("Resync requested by {}", peer_ip);
    Ok(HttpResponse::Accepted().json(json!({ "status": "resyncing" })))
}
