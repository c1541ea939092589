use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use super::{build_client, endpoint, get_json, parse_base_url, positive_price, HttpConfig};
use crate::error::ProviderError;
use crate::provider::{PriceProvider, Quote};
use crate::retry::RetryPolicy;

const SOURCE: &str = "justtcg";
const GAME: &str = "pokemon";

const PREFERRED_CONDITION: &str = "Near Mint";
const PREFERRED_PRINTING: &str = "Normal";

/// JustTCG prices, searched by card name. Quotes in USD.
///
/// The first search hit is used. Within its variants the Near Mint / Normal
/// printing wins when it carries a positive price, otherwise the first
/// variant with a positive price.
pub struct JustTcgProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl JustTcgProvider {
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBaseUrl`] for a malformed base URL, or
    /// [`ProviderError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str, http: &HttpConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(http)?,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.to_owned(),
            retry: http.retry,
        })
    }
}

fn pick_variant(variants: &[Value]) -> Option<f64> {
    let preferred = variants.iter().find(|v| {
        v.get("condition").and_then(Value::as_str) == Some(PREFERRED_CONDITION)
            && v.get("printing").and_then(Value::as_str) == Some(PREFERRED_PRINTING)
    });

    preferred
        .and_then(|v| positive_price(v.get("price")))
        .or_else(|| variants.iter().find_map(|v| positive_price(v.get("price"))))
}

#[async_trait]
impl PriceProvider for JustTcgProvider {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn fetch_price(
        &self,
        card_id: &str,
        card_name: Option<&str>,
    ) -> Result<Option<Quote>, ProviderError> {
        let Some(name) = card_name.map(str::trim).filter(|n| !n.is_empty()) else {
            tracing::debug!(card_id, source = SOURCE, "no card name to search by");
            return Ok(None);
        };

        let mut url = endpoint(&self.base_url, &["cards"]);
        url.query_pairs_mut()
            .append_pair("q", name)
            .append_pair("game", GAME);

        let Some(body) = get_json(
            &self.client,
            SOURCE,
            self.retry,
            &url,
            Some(("X-API-Key", self.api_key.as_str())),
        )
        .await?
        else {
            return Ok(None);
        };

        let variants = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|cards| cards.first())
            .and_then(|card| card.get("variants"))
            .and_then(Value::as_array);

        let Some(variants) = variants else {
            tracing::debug!(card_id, source = SOURCE, name, "no matching card or variants");
            return Ok(None);
        };

        Ok(pick_variant(variants).map(|price| {
            tracing::debug!(card_id, source = SOURCE, price, "price found");
            Quote::usd(SOURCE, price)
        }))
    }
}
