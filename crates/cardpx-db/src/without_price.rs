//! Database operations for `cards_without_price`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `cards_without_price` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WithoutPriceRow {
    pub card_id: String,
    pub attempt_count: i32,
    pub last_attempt: DateTime<Utc>,
    pub last_error: Option<String>,
    pub source_failures: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts over `cards_without_price`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct WithoutPriceStatsRow {
    pub total_cards: i64,
    /// Cards that failed exactly once.
    pub first_attempt: i64,
    /// Cards with 2 to 5 failures.
    pub few_attempts: i64,
    /// Cards with more than 5 failures.
    pub many_attempts: i64,
    pub avg_attempts: Option<f64>,
    pub oldest_attempt: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Records a total-failure aggregation for a card.
///
/// Inserts with `attempt_count = 1` on first failure; on conflict increments
/// `attempt_count` and overwrites `last_attempt`, `last_error` and
/// `source_failures`. Returns the new attempt count.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn mark_card_without_price(
    pool: &PgPool,
    card_id: &str,
    last_error: &str,
    source_failures: &serde_json::Value,
) -> Result<i32, DbError> {
    let attempt_count = sqlx::query_scalar::<_, i32>(
        "INSERT INTO cards_without_price (card_id, attempt_count, last_attempt, last_error, source_failures) \
         VALUES ($1, 1, NOW(), $2, $3) \
         ON CONFLICT (card_id) DO UPDATE SET \
             attempt_count = cards_without_price.attempt_count + 1, \
             last_attempt = NOW(), \
             last_error = EXCLUDED.last_error, \
             source_failures = EXCLUDED.source_failures \
         RETURNING attempt_count",
    )
    .bind(card_id)
    .bind(last_error)
    .bind(source_failures)
    .fetch_one(pool)
    .await?;

    Ok(attempt_count)
}

/// Removes a card's without-price record. Returns `false` when there was none.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn clear_card_without_price(pool: &PgPool, card_id: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM cards_without_price WHERE card_id = $1")
        .bind(card_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_card_without_price(
    pool: &PgPool,
    card_id: &str,
) -> Result<Option<WithoutPriceRow>, DbError> {
    let row = sqlx::query_as::<_, WithoutPriceRow>(
        "SELECT card_id, attempt_count, last_attempt, last_error, source_failures, created_at \
         FROM cards_without_price \
         WHERE card_id = $1",
    )
    .bind(card_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Card ids whose last attempt is older than `older_than_days`, least-tried
/// first, oldest attempt breaking ties.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_retryable_cards(
    pool: &PgPool,
    older_than_days: i32,
    limit: i64,
) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT card_id \
         FROM cards_without_price \
         WHERE last_attempt < NOW() - make_interval(days => $1) \
         ORDER BY attempt_count ASC, last_attempt ASC \
         LIMIT $2",
    )
    .bind(older_than_days)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Card ids that normal selection must skip: at least `min_attempts`
/// failures with the last one inside the last `cooldown_days`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_excluded_cards(
    pool: &PgPool,
    min_attempts: i32,
    cooldown_days: i32,
) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT card_id \
         FROM cards_without_price \
         WHERE attempt_count >= $1 \
           AND last_attempt >= NOW() - make_interval(days => $2) \
         ORDER BY card_id",
    )
    .bind(min_attempts)
    .bind(cooldown_days)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn without_price_stats(pool: &PgPool) -> Result<WithoutPriceStatsRow, DbError> {
    let row = sqlx::query_as::<_, WithoutPriceStatsRow>(
        "SELECT \
             COUNT(*) AS total_cards, \
             COUNT(*) FILTER (WHERE attempt_count = 1) AS first_attempt, \
             COUNT(*) FILTER (WHERE attempt_count BETWEEN 2 AND 5) AS few_attempts, \
             COUNT(*) FILTER (WHERE attempt_count > 5) AS many_attempts, \
             AVG(attempt_count)::float8 AS avg_attempts, \
             MIN(last_attempt) AS oldest_attempt \
         FROM cards_without_price",
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}
