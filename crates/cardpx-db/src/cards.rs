//! Read access to the catalog's `cards` table and the batch selection queries.
//!
//! Every selection query returns card ids only; the runner loads each card
//! individually right before pricing it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `cards` table, limited to the columns the price engine uses.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CardRow {
    pub id: String,
    pub name: String,
    pub set_id: Option<String>,
    pub last_price_usd: Option<Decimal>,
    pub last_price_eur: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// Fetch a single card by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_card(pool: &PgPool, card_id: &str) -> Result<Option<CardRow>, DbError> {
    let row = sqlx::query_as::<_, CardRow>(
        "SELECT id, name, set_id, last_price_usd, last_price_eur, updated_at \
         FROM cards \
         WHERE id = $1",
    )
    .bind(card_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Every card id in the catalog, ordered by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_all_card_ids(pool: &PgPool) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar::<_, String>("SELECT id FROM cards ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

/// Cards that have never been priced, skipping cards the without-price
/// tracker has excluded (`attempt_count >= min_attempts` with a last attempt
/// inside the last `cooldown_days`).
///
/// A `None` limit returns every matching card.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_cards_missing_price(
    pool: &PgPool,
    min_attempts: i32,
    cooldown_days: i32,
    limit: Option<i64>,
) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT c.id \
         FROM cards c \
         WHERE c.last_price_usd IS NULL \
           AND c.last_price_eur IS NULL \
           AND NOT EXISTS ( \
               SELECT 1 FROM cards_without_price w \
               WHERE w.card_id = c.id \
                 AND w.attempt_count >= $1 \
                 AND w.last_attempt >= NOW() - make_interval(days => $2) \
           ) \
         ORDER BY c.id \
         LIMIT $3",
    )
    .bind(min_attempts)
    .bind(cooldown_days)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Cards with no price history row younger than `max_age_hours`, in random
/// order so repeated runs spread across the catalog.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stale_cards(
    pool: &PgPool,
    max_age_hours: i32,
    min_attempts: i32,
    cooldown_days: i32,
    limit: i64,
) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT c.id \
         FROM cards c \
         WHERE NOT EXISTS ( \
               SELECT 1 FROM price_history ph \
               WHERE ph.card_id = c.id \
                 AND ph.created_at > NOW() - make_interval(hours => $1) \
           ) \
           AND NOT EXISTS ( \
               SELECT 1 FROM cards_without_price w \
               WHERE w.card_id = c.id \
                 AND w.attempt_count >= $2 \
                 AND w.last_attempt >= NOW() - make_interval(days => $3) \
           ) \
         ORDER BY random() \
         LIMIT $4",
    )
    .bind(max_age_hours)
    .bind(min_attempts)
    .bind(cooldown_days)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Cards with more than `min_updates` history rows in the last
/// `window_days`, most active first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_hot_cards(
    pool: &PgPool,
    min_updates: i64,
    window_days: i32,
    limit: i64,
) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT ph.card_id \
         FROM price_history ph \
         WHERE ph.created_at > NOW() - make_interval(days => $1) \
         GROUP BY ph.card_id \
         HAVING COUNT(*) > $2 \
         ORDER BY COUNT(*) DESC, ph.card_id \
         LIMIT $3",
    )
    .bind(window_days)
    .bind(min_updates)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}
