use async_trait::async_trait;
use reqwest::{Client, Url};

use super::{build_client, endpoint, first_positive, get_json, parse_base_url, HttpConfig};
use crate::error::ProviderError;
use crate::provider::{PriceProvider, Quote};
use crate::retry::RetryPolicy;

const SOURCE: &str = "tcgplayer";

/// Print variants in preference order; each variant's `market` price is used.
const VARIANT_PRIORITY: &[&str] = &[
    "holofoil",
    "reverseHolofoil",
    "normal",
    "unlimitedHolofoil",
    "1stEditionHolofoil",
];

/// TCGPlayer market prices via the Pokémon TCG API. Quotes in USD.
///
/// Looks cards up by id at `{base}/cards/{card_id}` and reads
/// `data.tcgplayer.prices.<variant>.market`.
pub struct TcgPlayerProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl TcgPlayerProvider {
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

#[async_trait]
impl PriceProvider for TcgPlayerProvider {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn fetch_price(
        &self,
        card_id: &str,
        _card_name: Option<&str>,
    ) -> Result<Option<Quote>, ProviderError> {
        let url = endpoint(&self.base_url, &["cards", card_id]);
        let Some(body) = get_json(
            &self.client,
            SOURCE,
            self.retry,
            &url,
            Some(("X-Api-Key", self.api_key.as_str())),
        )
        .await?
        else {
            tracing::debug!(card_id, source = SOURCE, "card not found");
            return Ok(None);
        };

        let Some(prices) = body.pointer("/data/tcgplayer/prices") else {
            tracing::debug!(card_id, source = SOURCE, "no price data");
            return Ok(None);
        };

        let picked = first_positive(VARIANT_PRIORITY, |variant| {
            prices.get(variant).and_then(|v| v.get("market"))
        });

        Ok(picked.map(|(variant, price)| {
            tracing::debug!(card_id, source = SOURCE, variant, price, "price found");
            Quote::usd(SOURCE, price)
        }))
    }
}
