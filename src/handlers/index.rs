// src/handlers/index.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::resync::ResyncController;
use crate::storage::memory::ServerCache;
use crate::storage::servers::ServerList;

pub async fn index(
    servers: web::Data<ServerList>,
    cache: web::Data<ServerCache>,
    controller: web::Data<ResyncController>,
) -> HttpResponse {
    // Nothing cached yet means the first poll cycle has not finished.
    let status = if cache.is_empty() { "starting" } else { "ok" };
    HttpResponse::Ok().json(json!({
        "status": status,
        "servers": servers.len(),
        "resyncing": controller.is_resyncing(),
        "presentation_failures": controller.failures(),
        "resync_threshold": controller.threshold(),
    }))
}
