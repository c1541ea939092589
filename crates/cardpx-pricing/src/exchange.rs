//! EUR→USD exchange rate used to normalize quotes into both currencies.
//!
//! The rate is always expressed as "USD per 1 EUR". Lookups never fail: any
//! error yields the configured fallback so aggregation is never blocked on
//! the rate service.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::ProviderError;
use crate::providers::{build_client, HttpConfig};

pub const DEFAULT_EUR_USD_FALLBACK: f64 = 1.08;

/// How long the fallback is served after a failed lookup before the service
/// is asked again.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// USD per 1 EUR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EurUsdRate(f64);

impl EurUsdRate {
    /// Returns `None` unless `rate` is finite and positive.
    #[must_use]
    pub fn new(rate: f64) -> Option<Self> {
        (rate.is_finite() && rate > 0.0).then_some(Self(rate))
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn eur_to_usd(self, eur: f64) -> f64 {
        eur * self.0
    }

    #[must_use]
    pub fn usd_to_eur(self, usd: f64) -> f64 {
        usd / self.0
    }
}

#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    async fn eur_to_usd(&self) -> EurUsdRate;
}

/// A constant rate. Used in tests and when no rate service is configured.
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub EurUsdRate);

#[async_trait]
impl ExchangeRateSource for FixedRate {
    async fn eur_to_usd(&self) -> EurUsdRate {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: Rates,
}

#[derive(Debug, Deserialize)]
struct Rates {
    #[serde(rename = "USD")]
    usd: f64,
}

/// Fetches `{ "rates": { "USD": r } }` from a EUR-based rates endpoint and
/// caches a successful answer for `ttl`.
///
/// A failed lookup caches the fallback for the failure backoff (capped at
/// `ttl`), so a down or hanging service costs one timeout per backoff window
/// rather than one per card.
pub struct HttpExchangeRate {
    client: Client,
    url: Url,
    fallback: EurUsdRate,
    ttl: Duration,
    failure_backoff: Duration,
    cached: RwLock<Option<CachedRate>>,
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: EurUsdRate,
    expires_at: Instant,
}

impl CachedRate {
    fn fresh(&self) -> Option<EurUsdRate> {
        (Instant::now() < self.expires_at).then_some(self.rate)
    }
}

impl HttpExchangeRate {
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBaseUrl`] for a malformed URL,
    /// [`ProviderError::InvalidRate`] for an unusable fallback, or
    /// [`ProviderError::Http`] if the HTTP client cannot be built.
    pub fn new(
        url: &str,
        fallback: f64,
        ttl: Duration,
        http: &HttpConfig,
    ) -> Result<Self, ProviderError> {
        let parsed = Url::parse(url).map_err(|e| ProviderError::InvalidBaseUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let fallback = EurUsdRate::new(fallback).ok_or(ProviderError::InvalidRate(fallback))?;

        Ok(Self {
            client: build_client(http)?,
            url: parsed,
            fallback,
            ttl,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            cached: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    async fn fetch(&self) -> Result<EurUsdRate, ProviderError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let body = response.text().await?;
        let parsed: RatesResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Deserialize {
                context: self.url.to_string(),
                source: e,
            })?;

        EurUsdRate::new(parsed.rates.usd).ok_or(ProviderError::InvalidRate(parsed.rates.usd))
    }
}

#[async_trait]
impl ExchangeRateSource for HttpExchangeRate {
    async fn eur_to_usd(&self) -> EurUsdRate {
        if let Some(rate) = (*self.cached.read().await).and_then(|c| c.fresh()) {
            return rate;
        }

        // Concurrent callers queue here behind a single refresh.
        let mut cached = self.cached.write().await;
        if let Some(rate) = (*cached).and_then(|c| c.fresh()) {
            return rate;
        }

        let (rate, valid_for) = match self.fetch().await {
            Ok(rate) => {
                tracing::debug!(rate = rate.value(), "exchange rate refreshed");
                (rate, self.ttl)
            }
            Err(e) => {
                let backoff = self.failure_backoff.min(self.ttl);
                tracing::warn!(
                    error = %e,
                    fallback = self.fallback.value(),
                    retry_in = ?backoff,
                    "exchange rate lookup failed, using fallback"
                );
                (self.fallback, backoff)
            }
        };
        *cached = Some(CachedRate {
            rate,
            expires_at: Instant::now() + valid_for,
        });
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_go_both_ways() {
        let rate = EurUsdRate::new(1.1).unwrap();
        assert!((rate.usd_to_eur(11.0) - 10.0).abs() < 0.01);
        assert!((rate.eur_to_usd(10.0) - 11.0).abs() < 0.01);
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(EurUsdRate::new(0.0).is_none());
        assert!(EurUsdRate::new(-1.0).is_none());
        assert!(EurUsdRate::new(f64::NAN).is_none());
    }

    #[tokio::test]
    async fn fixed_rate_returns_its_value() {
        let source = FixedRate(EurUsdRate::new(1.25).unwrap());
        assert!((source.eur_to_usd().await.value() - 1.25).abs() < f64::EPSILON);
    }
}
