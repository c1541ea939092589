use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,

    pub http_timeout_secs: u64,
    pub http_user_agent: String,
    /// Ceiling on a single provider call, retries included.
    pub provider_timeout_secs: u64,
    pub provider_max_retries: u32,
    pub provider_retry_backoff_ms: u64,

    pub pokemon_tcg_api_url: String,
    pub pokemon_tcg_api_key: Option<String>,
    pub tcgdex_api_url: String,
    pub justtcg_api_url: String,
    pub justtcg_api_key: Option<String>,

    pub exchange_rate_url: String,
    pub exchange_rate_fallback: f64,
    pub exchange_rate_ttl_secs: u64,

    pub sync_throttle_ms: u64,
    pub retry_throttle_ms: u64,
    pub without_price_min_attempts: i32,
    pub without_price_cooldown_days: i32,
    pub hot_min_updates: i64,
    pub hot_window_days: i32,
    pub hot_batch_limit: i64,
    pub stale_max_age_hours: i32,
    pub stale_batch_limit: i64,
    pub retry_batch_limit: i64,

    pub scheduler_enabled: bool,
    pub disabled_jobs: Vec<String>,
    pub hot_prices_cron: String,
    pub stale_prices_cron: String,
    pub missing_prices_cron: String,
    pub retry_without_price_cron: String,
    pub initial_fill: bool,
    pub initial_fill_limit: Option<i64>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("http_user_agent", &self.http_user_agent)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("provider_max_retries", &self.provider_max_retries)
            .field("provider_retry_backoff_ms", &self.provider_retry_backoff_ms)
            .field("pokemon_tcg_api_url", &self.pokemon_tcg_api_url)
            .field(
                "pokemon_tcg_api_key",
                &self.pokemon_tcg_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("tcgdex_api_url", &self.tcgdex_api_url)
            .field("justtcg_api_url", &self.justtcg_api_url)
            .field(
                "justtcg_api_key",
                &self.justtcg_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("exchange_rate_url", &self.exchange_rate_url)
            .field("exchange_rate_fallback", &self.exchange_rate_fallback)
            .field("exchange_rate_ttl_secs", &self.exchange_rate_ttl_secs)
            .field("sync_throttle_ms", &self.sync_throttle_ms)
            .field("retry_throttle_ms", &self.retry_throttle_ms)
            .field(
                "without_price_min_attempts",
                &self.without_price_min_attempts,
            )
            .field(
                "without_price_cooldown_days",
                &self.without_price_cooldown_days,
            )
            .field("hot_min_updates", &self.hot_min_updates)
            .field("hot_window_days", &self.hot_window_days)
            .field("hot_batch_limit", &self.hot_batch_limit)
            .field("stale_max_age_hours", &self.stale_max_age_hours)
            .field("stale_batch_limit", &self.stale_batch_limit)
            .field("retry_batch_limit", &self.retry_batch_limit)
            .field("scheduler_enabled", &self.scheduler_enabled)
            .field("disabled_jobs", &self.disabled_jobs)
            .field("hot_prices_cron", &self.hot_prices_cron)
            .field("stale_prices_cron", &self.stale_prices_cron)
            .field("missing_prices_cron", &self.missing_prices_cron)
            .field("retry_without_price_cron", &self.retry_without_price_cron)
            .field("initial_fill", &self.initial_fill)
            .field("initial_fill_limit", &self.initial_fill_limit)
            .finish()
    }
}
