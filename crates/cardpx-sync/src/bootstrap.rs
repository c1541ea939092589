//! Wires providers, the exchange-rate source and the store into a runner.

use std::sync::Arc;
use std::time::Duration;

use cardpx_core::{AppConfig, WithoutPricePolicy};
use cardpx_pricing::{
    Aggregator, CardmarketProvider, HttpConfig, HttpExchangeRate, JustTcgProvider, PriceProvider,
    RetryPolicy, TcgPlayerProvider,
};

use crate::error::SyncError;
use crate::runner::BatchRunner;
use crate::store::PriceStore;

#[must_use]
pub fn http_config(config: &AppConfig) -> HttpConfig {
    HttpConfig {
        timeout_secs: config.http_timeout_secs,
        user_agent: config.http_user_agent.clone(),
        retry: RetryPolicy {
            max_retries: config.provider_max_retries,
            backoff_base_ms: config.provider_retry_backoff_ms,
        },
    }
}

#[must_use]
pub fn without_price_policy(config: &AppConfig) -> WithoutPricePolicy {
    WithoutPricePolicy {
        min_attempts: config.without_price_min_attempts,
        cooldown_days: config.without_price_cooldown_days,
    }
}

/// Builds the configured provider set. Keyed providers are left out when
/// their key is not configured.
///
/// # Errors
///
/// Returns [`SyncError::Provider`] if a base URL is invalid or an HTTP
/// client cannot be built.
pub fn build_providers(config: &AppConfig) -> Result<Vec<Arc<dyn PriceProvider>>, SyncError> {
    let http = http_config(config);
    let mut providers: Vec<Arc<dyn PriceProvider>> = Vec::new();

    match config.pokemon_tcg_api_key.as_deref() {
        Some(key) => providers.push(Arc::new(TcgPlayerProvider::new(
            &config.pokemon_tcg_api_url,
            key,
            &http,
        )?)),
        None => tracing::warn!("POKEMON_TCG_API_KEY not set; tcgplayer provider disabled"),
    }

    providers.push(Arc::new(CardmarketProvider::new(
        &config.tcgdex_api_url,
        &http,
    )?));

    match config.justtcg_api_key.as_deref() {
        Some(key) => providers.push(Arc::new(JustTcgProvider::new(
            &config.justtcg_api_url,
            key,
            &http,
        )?)),
        None => tracing::warn!("JUST_TCG_API_KEY not set; justtcg provider disabled"),
    }

    Ok(providers)
}

/// Builds the batch runner shared by the scheduler, the HTTP API and the CLI.
///
/// # Errors
///
/// Returns [`SyncError::Provider`] for provider or exchange-rate setup
/// failures, or [`SyncError::Aggregate`] if the provider set is unusable.
pub fn build_runner(
    config: &AppConfig,
    store: Arc<dyn PriceStore>,
) -> Result<Arc<BatchRunner>, SyncError> {
    let providers = build_providers(config)?;
    let rates = HttpExchangeRate::new(
        &config.exchange_rate_url,
        config.exchange_rate_fallback,
        Duration::from_secs(config.exchange_rate_ttl_secs),
        &http_config(config),
    )?;
    let aggregator = Aggregator::new(
        providers,
        Arc::new(rates),
        Duration::from_secs(config.provider_timeout_secs),
    )?;

    tracing::info!(sources = ?aggregator.sources(), "price aggregator ready");

    Ok(Arc::new(BatchRunner::new(
        Arc::new(aggregator),
        store,
        without_price_policy(config),
    )))
}
