use std::net::SocketAddr;
use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing is decoupled from the real environment so tests can feed a plain
/// `HashMap` instead of calling `set_var`/`remove_var`.
///
/// # Errors
///
/// Returns `ConfigError` if required values are missing or values are invalid.
#[allow(clippy::too_many_lines)]
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let parse_i32 = |var: &str, default: &str| -> Result<i32, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let parse_i64 = |var: &str, default: &str| -> Result<i64, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let parse_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        parse_value(var, &or_default(var, default))
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("CARDPX_ENV", "development"));
    let bind_addr = parse_addr("CARDPX_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("CARDPX_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("CARDPX_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("CARDPX_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("CARDPX_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let http_timeout_secs = parse_u64("CARDPX_HTTP_TIMEOUT_SECS", "15")?;
    let http_user_agent = or_default("CARDPX_HTTP_USER_AGENT", "cardpx/0.1 (price-sync)");
    let provider_timeout_secs = parse_u64("CARDPX_PROVIDER_TIMEOUT_SECS", "45")?;
    let provider_max_retries = parse_u32("CARDPX_PROVIDER_MAX_RETRIES", "1")?;
    let provider_retry_backoff_ms = parse_u64("CARDPX_PROVIDER_RETRY_BACKOFF_MS", "3000")?;

    let pokemon_tcg_api_url = or_default("POKEMON_TCG_API_URL", "https://api.pokemontcg.io/v2");
    let pokemon_tcg_api_key = optional("POKEMON_TCG_API_KEY");
    let tcgdex_api_url = or_default("TCGDEX_API_URL", "https://api.tcgdex.net/v2/en");
    let justtcg_api_url = or_default("JUST_TCG_API_URL", "https://api.justtcg.com/v1");
    let justtcg_api_key = optional("JUST_TCG_API_KEY");

    let exchange_rate_url = or_default(
        "CARDPX_EXCHANGE_RATE_URL",
        "https://open.er-api.com/v6/latest/EUR",
    );
    let exchange_rate_fallback = parse_f64("CARDPX_EXCHANGE_RATE_FALLBACK", "1.08")?;
    if !(exchange_rate_fallback.is_finite() && exchange_rate_fallback > 0.0) {
        return Err(ConfigError::InvalidEnvVar {
            var: "CARDPX_EXCHANGE_RATE_FALLBACK".to_string(),
            reason: "must be a positive number".to_string(),
        });
    }
    let exchange_rate_ttl_secs = parse_u64("CARDPX_EXCHANGE_RATE_TTL_SECS", "3600")?;

    let sync_throttle_ms = parse_u64("CARDPX_SYNC_THROTTLE_MS", "2500")?;
    let retry_throttle_ms = parse_u64("CARDPX_RETRY_THROTTLE_MS", "2000")?;
    let without_price_min_attempts = parse_i32("CARDPX_WITHOUT_PRICE_MIN_ATTEMPTS", "2")?;
    let without_price_cooldown_days = parse_i32("CARDPX_WITHOUT_PRICE_COOLDOWN_DAYS", "30")?;
    let hot_min_updates = parse_i64("CARDPX_HOT_MIN_UPDATES", "10")?;
    let hot_window_days = parse_i32("CARDPX_HOT_WINDOW_DAYS", "7")?;
    let hot_batch_limit = parse_i64("CARDPX_HOT_BATCH_LIMIT", "50")?;
    let stale_max_age_hours = parse_i32("CARDPX_STALE_MAX_AGE_HOURS", "6")?;
    let stale_batch_limit = parse_i64("CARDPX_STALE_BATCH_LIMIT", "100")?;
    let retry_batch_limit = parse_i64("CARDPX_RETRY_BATCH_LIMIT", "50")?;

    let scheduler_enabled = parse_bool("CARDPX_SCHEDULER_ENABLED", "true")?;
    let disabled_jobs = or_default("CARDPX_DISABLED_JOBS", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect();
    let hot_prices_cron = or_default("CARDPX_HOT_PRICES_CRON", "0 0 * * * *");
    let stale_prices_cron = or_default("CARDPX_STALE_PRICES_CRON", "0 30 */6 * * *");
    let missing_prices_cron = or_default("CARDPX_MISSING_PRICES_CRON", "0 0 2 * * *");
    let retry_without_price_cron = or_default("CARDPX_RETRY_WITHOUT_PRICE_CRON", "0 0 4 * * SUN");
    let initial_fill = parse_bool("CARDPX_INITIAL_FILL", "false")?;
    let initial_fill_limit = optional("CARDPX_INITIAL_FILL_LIMIT")
        .map(|raw| parse_value("CARDPX_INITIAL_FILL_LIMIT", &raw))
        .transpose()?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        http_timeout_secs,
        http_user_agent,
        provider_timeout_secs,
        provider_max_retries,
        provider_retry_backoff_ms,
        pokemon_tcg_api_url,
        pokemon_tcg_api_key,
        tcgdex_api_url,
        justtcg_api_url,
        justtcg_api_key,
        exchange_rate_url,
        exchange_rate_fallback,
        exchange_rate_ttl_secs,
        sync_throttle_ms,
        retry_throttle_ms,
        without_price_min_attempts,
        without_price_cooldown_days,
        hot_min_updates,
        hot_window_days,
        hot_batch_limit,
        stale_max_age_hours,
        stale_batch_limit,
        retry_batch_limit,
        scheduler_enabled,
        disabled_jobs,
        hot_prices_cron,
        stale_prices_cron,
        missing_prices_cron,
        retry_without_price_cron,
        initial_fill,
        initial_fill_limit,
    })
}

fn parse_value<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}
