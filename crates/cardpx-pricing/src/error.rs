use std::time::Duration;

use thiserror::Error;

/// Errors returned by a single price provider call.
///
/// A provider that simply has no price for a card returns `Ok(None)`; these
/// variants cover everything else.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// HTTP 429 from the source.
    #[error("rate limited by {source_name}, retry after {retry_after_secs}s")]
    RateLimited {
        source_name: String,
        retry_after_secs: u64,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The call did not finish within the aggregator's per-provider ceiling.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The exchange-rate service answered with a zero, negative or non-finite rate.
    #[error("unusable exchange rate: {0}")]
    InvalidRate(f64),

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}
