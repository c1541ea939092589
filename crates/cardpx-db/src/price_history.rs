//! Database operations for `price_history` and the denormalized last-price
//! columns on `cards`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `price_history` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PriceHistoryRow {
    pub id: i64,
    pub card_id: String,
    pub price_usd: Option<Decimal>,
    pub price_eur: Option<Decimal>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// One provider quote to append to the history.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceObservation {
    pub source: String,
    pub price_usd: Option<f64>,
    pub price_eur: Option<f64>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Appends one history row per observation and overwrites the card's
/// denormalized last-price columns, all in one transaction.
///
/// A transaction-scoped advisory lock keyed on the card id serializes
/// concurrent writers for the same card, so the last-price columns always
/// match the most recently committed set of history rows. Prices are bound
/// as `f64` and rounded to two decimals by the `numeric(10,2)` cast.
///
/// Returns the number of history rows inserted.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the card does not exist (nothing is
/// written), or [`DbError::Sqlx`] if any statement fails.
pub async fn record_price_observations(
    pool: &PgPool,
    card_id: &str,
    observations: &[NewPriceObservation],
    last_price_usd: Option<f64>,
    last_price_eur: Option<f64>,
) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;

    let updated = sqlx::query(
        "UPDATE cards \
         SET last_price_usd = $2::numeric(10,2), \
             last_price_eur = $3::numeric(10,2), \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(card_id)
    .bind(last_price_usd)
    .bind(last_price_eur)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    let mut inserted = 0usize;
    for observation in observations {
        sqlx::query(
            "INSERT INTO price_history (card_id, price_usd, price_eur, source) \
             VALUES ($1, $2::numeric(10,2), $3::numeric(10,2), $4)",
        )
        .bind(card_id)
        .bind(observation.price_usd)
        .bind(observation.price_eur)
        .bind(&observation.source)
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Most recent history rows for a card, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_price_history(
    pool: &PgPool,
    card_id: &str,
    limit: i64,
) -> Result<Vec<PriceHistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, PriceHistoryRow>(
        "SELECT id, card_id, price_usd, price_eur, source, created_at \
         FROM price_history \
         WHERE card_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(card_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
