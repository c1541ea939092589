//! Multi-source price aggregation.
//!
//! [`Aggregator::aggregate`] fans out to every configured provider at once,
//! waits for all of them (each bounded by its own timeout), converts every
//! quote into both currencies and averages USD and EUR independently.
//! Provider failures are recorded in the per-source status map and never
//! abort the aggregation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::error::ProviderError;
use crate::exchange::{EurUsdRate, ExchangeRateSource};
use crate::provider::{PriceProvider, Quote};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no price providers are configured")]
    NoProviders,

    #[error("price provider '{0}' is registered more than once")]
    DuplicateSource(String),
}

/// A quote carrying both currencies after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedQuote {
    pub source: String,
    pub price_usd: f64,
    pub price_eur: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The source has no price for this card.
    Absent,
    /// Transport failure or unexpected response.
    Error,
    /// The call exceeded the per-provider timeout.
    Timeout,
}

/// Outcome of one provider call within an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Success { price_usd: f64, price_eur: f64 },
    Failure { kind: FailureKind, reason: String },
}

impl SourceStatus {
    fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub card_id: String,
    /// Unrounded mean of all EUR-normalized quotes.
    pub average_price_eur: Option<f64>,
    /// Unrounded mean of all USD-normalized quotes.
    pub average_price_usd: Option<f64>,
    pub quotes: Vec<NormalizedQuote>,
    pub source_count: usize,
    pub source_status: BTreeMap<String, SourceStatus>,
    pub eur_to_usd_rate: f64,
}

impl AggregationResult {
    #[must_use]
    pub fn has_price(&self) -> bool {
        self.source_count >= 1
    }

    /// True when at least one source failed for a reason other than simply
    /// having no price.
    #[must_use]
    pub fn has_provider_errors(&self) -> bool {
        self.source_status.values().any(|status| {
            matches!(
                status,
                SourceStatus::Failure {
                    kind: FailureKind::Error | FailureKind::Timeout,
                    ..
                }
            )
        })
    }

    /// One-line description of every failed source, e.g.
    /// `"cardmarket: absent (no price); tcgplayer: timeout (...)"`.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let parts: Vec<String> = self
            .source_status
            .iter()
            .filter_map(|(source, status)| match status {
                SourceStatus::Failure { kind, reason } => {
                    let kind = match kind {
                        FailureKind::Absent => "absent",
                        FailureKind::Error => "error",
                        FailureKind::Timeout => "timeout",
                    };
                    Some(format!("{source}: {kind} ({reason})"))
                }
                SourceStatus::Success { .. } => None,
            })
            .collect();

        if parts.is_empty() {
            "no sources returned a price".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Fans out to every configured [`PriceProvider`] and reconciles the answers.
pub struct Aggregator {
    providers: Vec<Arc<dyn PriceProvider>>,
    rates: Arc<dyn ExchangeRateSource>,
    provider_timeout: Duration,
}

impl Aggregator {
    /// # Errors
    ///
    /// Returns [`AggregateError::NoProviders`] for an empty provider list and
    /// [`AggregateError::DuplicateSource`] when two providers share a source id.
    pub fn new(
        providers: Vec<Arc<dyn PriceProvider>>,
        rates: Arc<dyn ExchangeRateSource>,
        provider_timeout: Duration,
    ) -> Result<Self, AggregateError> {
        if providers.is_empty() {
            return Err(AggregateError::NoProviders);
        }

        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.source().to_string()) {
                return Err(AggregateError::DuplicateSource(provider.source().to_string()));
            }
        }

        Ok(Self {
            providers,
            rates,
            provider_timeout,
        })
    }

    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    /// Queries all providers concurrently and builds the consensus price.
    ///
    /// `set_name` is only used for logging.
    pub async fn aggregate(
        &self,
        card_id: &str,
        card_name: Option<&str>,
        set_name: Option<&str>,
    ) -> AggregationResult {
        let rate = self.rates.eur_to_usd().await;
        tracing::debug!(
            card_id,
            card_name,
            set_name,
            rate = rate.value(),
            providers = self.providers.len(),
            "aggregating price"
        );

        let calls = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            async move {
                let fetch = provider.fetch_price(card_id, card_name);
                let outcome = tokio::time::timeout(self.provider_timeout, fetch)
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(self.provider_timeout)));
                (provider.source().to_string(), outcome)
            }
        });
        let outcomes = join_all(calls).await;

        let mut quotes = Vec::new();
        let mut source_status = BTreeMap::new();

        for (source, outcome) in outcomes {
            let status = match outcome {
                Ok(Some(quote)) => match normalize(&quote, rate) {
                    Some(normalized) => {
                        tracing::debug!(
                            card_id,
                            source = %source,
                            price_usd = normalized.price_usd,
                            price_eur = normalized.price_eur,
                            "provider quoted"
                        );
                        let status = SourceStatus::Success {
                            price_usd: normalized.price_usd,
                            price_eur: normalized.price_eur,
                        };
                        quotes.push(normalized);
                        status
                    }
                    None => SourceStatus::failure(FailureKind::Absent, "quote carried no price"),
                },
                Ok(None) => {
                    tracing::debug!(card_id, source = %source, "provider has no price");
                    SourceStatus::failure(FailureKind::Absent, "no price")
                }
                Err(ProviderError::Timeout(after)) => {
                    tracing::warn!(card_id, source = %source, ?after, "provider timed out");
                    SourceStatus::failure(
                        FailureKind::Timeout,
                        format!("timed out after {after:?}"),
                    )
                }
                Err(e) => {
                    tracing::warn!(card_id, source = %source, error = %e, "provider failed");
                    SourceStatus::failure(FailureKind::Error, e.to_string())
                }
            };
            source_status.insert(source, status);
        }

        AggregationResult {
            card_id: card_id.to_string(),
            average_price_eur: mean(quotes.iter().map(|q| q.price_eur)),
            average_price_usd: mean(quotes.iter().map(|q| q.price_usd)),
            source_count: quotes.len(),
            quotes,
            source_status,
            eur_to_usd_rate: rate.value(),
        }
    }
}

/// Fills in whichever currency the provider did not quote.
fn normalize(quote: &Quote, rate: EurUsdRate) -> Option<NormalizedQuote> {
    let (price_usd, price_eur) = match (quote.price_usd, quote.price_eur) {
        (Some(usd), Some(eur)) => (usd, eur),
        (Some(usd), None) => (usd, rate.usd_to_eur(usd)),
        (None, Some(eur)) => (rate.eur_to_usd(eur), eur),
        (None, None) => return None,
    };
    Some(NormalizedQuote {
        source: quote.source.clone(),
        price_usd,
        price_eur,
    })
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
