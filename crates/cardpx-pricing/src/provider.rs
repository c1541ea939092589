use async_trait::async_trait;
use serde::Serialize;

use crate::error::ProviderError;

/// One provider's price observation for one card, in the provider's native
/// currency. At least one of the two prices is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub source: String,
    pub price_usd: Option<f64>,
    pub price_eur: Option<f64>,
}

impl Quote {
    #[must_use]
    pub fn usd(source: impl Into<String>, price: f64) -> Self {
        Self {
            source: source.into(),
            price_usd: Some(price),
            price_eur: None,
        }
    }

    #[must_use]
    pub fn eur(source: impl Into<String>, price: f64) -> Self {
        Self {
            source: source.into(),
            price_usd: None,
            price_eur: Some(price),
        }
    }
}

/// A single external pricing source.
///
/// Implementations return `Ok(None)` when the source simply has no price for
/// the card (HTTP 404, empty payload, no positive variant). `Err` is reserved
/// for transport failures and unexpected responses; the aggregator records
/// those per source and never lets them abort an aggregation.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Stable identifier, used as the key in per-source status maps.
    fn source(&self) -> &str;

    async fn fetch_price(
        &self,
        card_id: &str,
        card_name: Option<&str>,
    ) -> Result<Option<Quote>, ProviderError>;
}
