use async_trait::async_trait;
use reqwest::{Client, Url};

use super::{build_client, endpoint, first_positive, get_json, parse_base_url, HttpConfig};
use crate::error::ProviderError;
use crate::provider::{PriceProvider, Quote};
use crate::retry::RetryPolicy;

const SOURCE: &str = "cardmarket";

/// Cardmarket price fields in preference order.
const FIELD_PRIORITY: &[&str] = &["avg", "trend", "avg7", "avg30", "avg1", "low"];

/// Cardmarket prices via TCGdex. Quotes in EUR; no API key.
pub struct CardmarketProvider {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl CardmarketProvider {
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBaseUrl`] for a malformed base URL, or
    /// [`ProviderError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, http: &HttpConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(http)?,
            base_url: parse_base_url(base_url)?,
            retry: http.retry,
        })
    }
}

#[async_trait]
impl PriceProvider for CardmarketProvider {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn fetch_price(
        &self,
        card_id: &str,
        _card_name: Option<&str>,
    ) -> Result<Option<Quote>, ProviderError> {
        let url = endpoint(&self.base_url, &["cards", card_id]);
        let Some(body) = get_json(&self.client, SOURCE, self.retry, &url, None).await? else {
            tracing::debug!(card_id, source = SOURCE, "card not found");
            return Ok(None);
        };

        let Some(prices) = body.pointer("/pricing/cardmarket") else {
            tracing::debug!(card_id, source = SOURCE, "no pricing.cardmarket field");
            return Ok(None);
        };

        let picked = first_positive(FIELD_PRIORITY, |field| prices.get(field));

        Ok(picked.map(|(field, price)| {
            tracing::debug!(card_id, source = SOURCE, field, price, "price found");
            Quote::eur(SOURCE, price)
        }))
    }
}
