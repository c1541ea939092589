//! HTTP-backed [`PriceProvider`](crate::PriceProvider) implementations.
//!
//! All providers share one JSON fetch path: 404 and empty bodies mean "no
//! price", 429 becomes [`ProviderError::RateLimited`], other non-2xx statuses
//! become [`ProviderError::UnexpectedStatus`], and transient failures are
//! retried per the configured [`RetryPolicy`].

mod cardmarket;
mod justtcg;
mod tcgplayer;

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use crate::error::ProviderError;
use crate::retry::{retry_with_backoff, RetryPolicy};

pub use cardmarket::CardmarketProvider;
pub use justtcg::JustTcgProvider;
pub use tcgplayer::TcgPlayerProvider;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// HTTP settings shared by every provider.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: "cardpx/0.1 (price-sync)".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

pub(crate) fn build_client(config: &HttpConfig) -> Result<Client, ProviderError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(&config.user_agent)
        .build()?;
    Ok(client)
}

/// Parses and normalises a base URL so that appended path segments land
/// under it rather than replacing its last segment.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ProviderError> {
    let normalised = format!("{}/", raw.trim_end_matches('/'));
    let url = Url::parse(&normalised).map_err(|e| ProviderError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ProviderError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "expected an http(s) URL".to_string(),
        });
    }
    Ok(url)
}

/// Appends percent-encoded path segments to a base URL.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        path.extend(segments);
    }
    url
}

/// One JSON GET against a provider, with retry.
///
/// Returns `Ok(None)` for 404 and for an empty body.
pub(crate) async fn get_json(
    client: &Client,
    source: &str,
    retry: RetryPolicy,
    url: &Url,
    auth_header: Option<(&'static str, &str)>,
) -> Result<Option<Value>, ProviderError> {
    retry_with_backoff(retry, source, || get_json_once(client, source, url, auth_header)).await
}

async fn get_json_once(
    client: &Client,
    source: &str,
    url: &Url,
    auth_header: Option<(&'static str, &str)>,
) -> Result<Option<Value>, ProviderError> {
    let mut request = client.get(url.clone());
    if let Some((name, value)) = auth_header {
        request = request.header(name, value);
    }

    let response = request.send().await?;
    let status = response.status();
    tracing::debug!(source, status = status.as_u16(), "provider responded");

    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(ProviderError::RateLimited {
            source_name: source.to_string(),
            retry_after_secs,
        });
    }

    if !status.is_success() {
        return Err(ProviderError::UnexpectedStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response.text().await?;
    if body.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| ProviderError::Deserialize {
            context: format!("{source} {url}"),
            source: e,
        })
}

/// A strictly positive, finite price, or `None`.
pub(crate) fn positive_price(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// Walks `priority` in order and returns the first field with a positive
/// price, along with the field name.
///
/// `extract` maps a field name to the JSON value holding its price.
pub(crate) fn first_positive<'a, F>(priority: &[&'a str], extract: F) -> Option<(&'a str, f64)>
where
    F: Fn(&str) -> Option<&'a Value>,
{
    priority
        .iter()
        .find_map(|field| positive_price(extract(field)).map(|price| (*field, price)))
}
