// src/main.rs
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use governor::RateLimiter;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use gsmon::config::Config;
use gsmon::handlers;
use gsmon::handlers::resync::KeyedLimiter;
use gsmon::handlers::servers::ServerEditLimiter;
use gsmon::protocols::ProtocolRegistry;
use gsmon::resync::{ResyncController, ResyncWorker};
use gsmon::scheduler::{Cadence, PollScheduler};
use gsmon::sink::{PresentationSink, Presenter, StdoutSink, WebhookSink};
use gsmon::storage::memory::ServerCache;
use gsmon::storage::servers::{download_server_list, ServerList};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logger only once at the start
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();

    if let Some(url) = &config.servers_json_url {
        info!("Downloading server list from {}", url);
        if let Err(e) = download_server_list(url, &config.servers_json).await {
            error!("Failed to download server list on start up: {}", e);
        }
    }

    let servers = match ServerList::load(&config.servers_json) {
        Ok(servers) => {
            if servers.is_empty() {
                warn!("Server list {} is empty, nothing will be polled", config.servers_json);
            }
            Arc::new(servers)
        }
        Err(e) => {
            error!("Failed to load server list: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let sink: Arc<dyn PresentationSink> = match &config.webhook_url {
        Some(url) => match WebhookSink::new(url, Duration::from_secs(10)) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!("Failed to set up webhook sink: {}", e);
                return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
            }
        },
        None => Arc::new(StdoutSink::new()),
    };
    info!("Rendering server views to {}", sink.name());

    let registry = Arc::new(ProtocolRegistry::builtin());
    let cache = Arc::new(ServerCache::new());
    let controller = Arc::new(ResyncController::new(config.resync_failure_threshold));
    let presenter = Arc::new(Mutex::new(Presenter::new(sink, config.sink_quota())));

    let worker = ResyncWorker::new(
        Arc::clone(&controller),
        Arc::clone(&presenter),
        Arc::clone(&cache),
        Arc::clone(&servers),
    );
    tokio::spawn(worker.run());

    let scheduler = PollScheduler::new(
        Cadence::new(
            config.effective_refresh_rate(),
            Duration::from_secs(config.min_refresh_rate_secs),
        ),
        config.query_timeout(),
        Arc::clone(&registry),
        Arc::clone(&cache),
        Arc::clone(&servers),
        presenter,
        Arc::clone(&controller),
    );
    tokio::spawn(scheduler.run(config.tick()));

    let resync_rate_limiter: web::Data<KeyedLimiter> =
        web::Data::new(RateLimiter::keyed(config.resync_quota()));
    let server_edit_rate_limiter =
        web::Data::new(ServerEditLimiter(RateLimiter::keyed(config.server_edit_quota())));
    let registry = web::Data::from(registry);
    let servers = web::Data::from(servers);
    let cache = web::Data::from(cache);
    let controller = web::Data::from(controller);

    let bind = format!("{}:{}", config.bind_address, config.port);
    info!("Starting admin API on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(servers.clone())
            .app_data(cache.clone())
            .app_data(controller.clone())
            .app_data(registry.clone())
            .app_data(resync_rate_limiter.clone())
            .app_data(server_edit_rate_limiter.clone())
            .route("/", web::get().to(handlers::index::index))
            .route("/servers", web::get().to(handlers::servers::get_servers))
            .route("/servers", web::post().to(handlers::servers::add_server))
            .route("/servers/{id}", web::delete().to(handlers::servers::delete_server))
            .route("/resync", web::post().to(handlers::resync::request_resync))
    })
        .bind(&bind)?
        .run().await
}
