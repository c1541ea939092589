//! Persistence seam for the sync engine.
//!
//! [`PgPriceStore`] is the production implementation over `cardpx-db`;
//! [`MemoryStore`] keeps everything in process for tests and dry runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use cardpx_core::{CardSelector, WithoutPricePolicy};
use cardpx_db::{DbError, WithoutPriceStatsRow};
use cardpx_pricing::AggregationResult;

pub use memory::MemoryStore;
pub use postgres::PgPriceStore;

/// The catalog fields the engine needs to price a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRef {
    pub id: String,
    pub name: String,
    pub set_id: Option<String>,
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_card(&self, card_id: &str) -> Result<Option<CardRef>, DbError>;

    /// Card ids a batch run should visit, in processing order.
    async fn select_card_ids(
        &self,
        selector: &CardSelector,
        policy: WithoutPricePolicy,
    ) -> Result<Vec<String>, DbError>;

    /// Appends one history row per quote and overwrites the card's last
    /// prices with the consensus, atomically. Returns rows written.
    async fn record_prices(&self, result: &AggregationResult) -> Result<usize, DbError>;

    /// Upserts the without-price record and returns the new attempt count.
    async fn mark_without_price(
        &self,
        card_id: &str,
        last_error: &str,
        source_failures: &serde_json::Value,
    ) -> Result<i32, DbError>;

    /// Returns `false` when there was no record to remove.
    async fn clear_without_price(&self, card_id: &str) -> Result<bool, DbError>;

    async fn retryable_card_ids(
        &self,
        older_than_days: i32,
        limit: i64,
    ) -> Result<Vec<String>, DbError>;

    async fn excluded_card_ids(&self, policy: WithoutPricePolicy) -> Result<Vec<String>, DbError>;

    async fn without_price_stats(&self) -> Result<WithoutPriceStatsRow, DbError>;
}
