//! Price providers, currency normalization and the multi-source aggregator.

pub mod aggregator;
pub mod error;
pub mod exchange;
pub mod provider;
pub mod providers;
pub mod retry;

pub use aggregator::{
    AggregateError, AggregationResult, Aggregator, FailureKind, NormalizedQuote, SourceStatus,
};
pub use error::ProviderError;
pub use exchange::{
    EurUsdRate, ExchangeRateSource, FixedRate, HttpExchangeRate, DEFAULT_EUR_USD_FALLBACK,
};
pub use provider::{PriceProvider, Quote};
pub use providers::{CardmarketProvider, HttpConfig, JustTcgProvider, TcgPlayerProvider};
pub use retry::RetryPolicy;
