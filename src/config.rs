use std::env;
use std::time::Duration;
use std::num::NonZeroU32;
use std::str::FromStr;
use governor::Quota;

/// Lowest refresh rate allowed, whatever the operator configures.
pub const MIN_REFRESH_RATE_SECS: u64 = 5;
/// One week.
pub const MAX_REFRESH_RATE_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_QUERY_TIMEOUT_SECS: u64 = 60;
const MAX_TICK_MILLIS: u64 = 60_000;

#[derive(Clone, Debug)]
pub struct Config {
    // Polling
    pub refresh_rate_secs: u64,
    pub min_refresh_rate_secs: u64,
    pub query_timeout_secs: u64,
    pub tick_millis: u64,

    // Resync policy
    pub resync_failure_threshold: u32,

    // Server list
    pub servers_json: String,
    pub servers_json_url: Option<String>,

    // Presentation
    pub webhook_url: Option<String>,
    pub sink_period_millis: u64,
    pub sink_burst_limit: u32,

    // Admin API
    pub bind_address: String,
    pub port: u16,
    pub resync_period_secs: u64,
    pub resync_burst_limit: u32,
    pub server_edit_period_secs: u64,
    pub server_edit_burst_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_rate_secs: 5,
            min_refresh_rate_secs: MIN_REFRESH_RATE_SECS,
            query_timeout_secs: 5,
            tick_millis: 1000,
            resync_failure_threshold: 10,
            servers_json: "configs/servers.json".to_string(),
            servers_json_url: None,
            webhook_url: None,
            sink_period_millis: 1000,
            sink_burst_limit: 5,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            resync_period_secs: 10,
            resync_burst_limit: 1,
            server_edit_period_secs: 2,
            server_edit_burst_limit: 5,
        }
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            refresh_rate_secs: var_or("REFRESH_RATE_SECS", defaults.refresh_rate_secs),
            min_refresh_rate_secs: var_or("MIN_REFRESH_RATE_SECS", defaults.min_refresh_rate_secs),
            query_timeout_secs: var_or("QUERY_TIMEOUT_SECS", defaults.query_timeout_secs),
            tick_millis: var_or("TICK_MILLIS", defaults.tick_millis),

            resync_failure_threshold: var_or("RESYNC_FAILURE_THRESHOLD", defaults.resync_failure_threshold),

            servers_json: var_or("SERVERS_JSON", defaults.servers_json),
            servers_json_url: non_empty_var("SERVERS_JSON_URL"),

            webhook_url: non_empty_var("WEBHOOK_URL"),
            sink_period_millis: var_or("SINK_PERIOD_MILLIS", defaults.sink_period_millis),
            sink_burst_limit: var_or("SINK_BURST_LIMIT", defaults.sink_burst_limit),

            bind_address: var_or("BIND_ADDRESS", defaults.bind_address),
            port: var_or("PORT", defaults.port),
            resync_period_secs: var_or("RESYNC_PERIOD_SECS", defaults.resync_period_secs),
            resync_burst_limit: var_or("RESYNC_BURST_LIMIT", defaults.resync_burst_limit),
            server_edit_period_secs: var_or("SERVER_EDIT_PERIOD_SECS", defaults.server_edit_period_secs),
            server_edit_burst_limit: var_or("SERVER_EDIT_BURST_LIMIT", defaults.server_edit_burst_limit),
        }
    }

    /// The configured refresh rate, raised to the floor if below it.
    /// Capped at `MAX_REFRESH_RATE_SECS`.
    pub fn effective_refresh_rate(&self) -> Duration {
        Duration::from_secs(
            self.refresh_rate_secs
                .max(self.min_refresh_rate_secs)
                .min(MAX_REFRESH_RATE_SECS),
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.clamp(1, MAX_QUERY_TIMEOUT_SECS))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.clamp(10, MAX_TICK_MILLIS))
    }

    pub fn sink_quota(&self) -> Quota {
        quota(Duration::from_millis(self.sink_period_millis), self.sink_burst_limit)
    }

    pub fn resync_quota(&self) -> Quota {
        quota(Duration::from_secs(self.resync_period_secs), self.resync_burst_limit)
    }

    pub fn server_edit_quota(&self) -> Quota {
        quota(Duration::from_secs(self.server_edit_period_secs), self.server_edit_burst_limit)
    }
}

fn quota(period: Duration, burst: u32) -> Quota {
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
        .allow_burst(burst)
}
