use async_trait::async_trait;
use cardpx_core::{CardSelector, WithoutPricePolicy};
use cardpx_db::{DbError, NewPriceObservation, WithoutPriceStatsRow};
use cardpx_pricing::AggregationResult;
use sqlx::PgPool;

use super::{CardRef, PriceStore};

/// [`PriceStore`] backed by the Postgres tables in `cardpx-db`.
#[derive(Debug, Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PriceStore for PgPriceStore {
    async fn get_card(&self, card_id: &str) -> Result<Option<CardRef>, DbError> {
        let row = cardpx_db::get_card(&self.pool, card_id).await?;
        Ok(row.map(|card| CardRef {
            id: card.id,
            name: card.name,
            set_id: card.set_id,
        }))
    }

    async fn select_card_ids(
        &self,
        selector: &CardSelector,
        policy: WithoutPricePolicy,
    ) -> Result<Vec<String>, DbError> {
        match *selector {
            CardSelector::All => cardpx_db::list_all_card_ids(&self.pool).await,
            CardSelector::Missing { limit } => {
                cardpx_db::list_cards_missing_price(
                    &self.pool,
                    policy.min_attempts,
                    policy.cooldown_days,
                    limit,
                )
                .await
            }
            CardSelector::Stale {
                max_age_hours,
                limit,
            } => {
                cardpx_db::list_stale_cards(
                    &self.pool,
                    max_age_hours,
                    policy.min_attempts,
                    policy.cooldown_days,
                    limit,
                )
                .await
            }
            CardSelector::Hot {
                min_updates,
                window_days,
                limit,
            } => cardpx_db::list_hot_cards(&self.pool, min_updates, window_days, limit).await,
            CardSelector::Retry {
                older_than_days,
                limit,
            } => cardpx_db::list_retryable_cards(&self.pool, older_than_days, limit).await,
        }
    }

    async fn record_prices(&self, result: &AggregationResult) -> Result<usize, DbError> {
        let observations: Vec<NewPriceObservation> = result
            .quotes
            .iter()
            .map(|quote| NewPriceObservation {
                source: quote.source.clone(),
                price_usd: Some(quote.price_usd),
                price_eur: Some(quote.price_eur),
            })
            .collect();

        cardpx_db::record_price_observations(
            &self.pool,
            &result.card_id,
            &observations,
            result.average_price_usd,
            result.average_price_eur,
        )
        .await
    }

    async fn mark_without_price(
        &self,
        card_id: &str,
        last_error: &str,
        source_failures: &serde_json::Value,
    ) -> Result<i32, DbError> {
        cardpx_db::mark_card_without_price(&self.pool, card_id, last_error, source_failures).await
    }

    async fn clear_without_price(&self, card_id: &str) -> Result<bool, DbError> {
        cardpx_db::clear_card_without_price(&self.pool, card_id).await
    }

    async fn retryable_card_ids(
        &self,
        older_than_days: i32,
        limit: i64,
    ) -> Result<Vec<String>, DbError> {
        cardpx_db::list_retryable_cards(&self.pool, older_than_days, limit).await
    }

    async fn excluded_card_ids(&self, policy: WithoutPricePolicy) -> Result<Vec<String>, DbError> {
        cardpx_db::list_excluded_cards(&self.pool, policy.min_attempts, policy.cooldown_days).await
    }

    async fn without_price_stats(&self) -> Result<WithoutPriceStatsRow, DbError> {
        cardpx_db::without_price_stats(&self.pool).await
    }
}
