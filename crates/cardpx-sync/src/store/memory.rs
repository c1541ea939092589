use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cardpx_core::{CardSelector, WithoutPricePolicy};
use cardpx_db::{DbError, WithoutPriceStatsRow};
use cardpx_pricing::AggregationResult;
use chrono::{DateTime, Duration, Utc};

use super::{CardRef, PriceStore};

#[derive(Debug, Clone)]
struct CardState {
    name: String,
    set_id: Option<String>,
    last_price_usd: Option<f64>,
    last_price_eur: Option<f64>,
}

/// One appended history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHistoryEntry {
    pub card_id: String,
    pub price_usd: f64,
    pub price_eur: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// A without-price record as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryWithoutPrice {
    pub attempt_count: i32,
    pub last_attempt: DateTime<Utc>,
    pub last_error: String,
    pub source_failures: serde_json::Value,
}

#[derive(Debug, Default)]
struct State {
    cards: BTreeMap<String, CardState>,
    history: Vec<MemoryHistoryEntry>,
    without_price: BTreeMap<String, MemoryWithoutPrice>,
    failing_writes: Vec<String>,
}

/// In-process [`PriceStore`] with the same selection semantics as the
/// Postgres store, except that stale cards come back in id order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_card(&self, id: &str, name: &str) {
        self.lock().cards.insert(
            id.to_string(),
            CardState {
                name: name.to_string(),
                set_id: None,
                last_price_usd: None,
                last_price_eur: None,
            },
        );
    }

    /// Makes every later `record_prices` call for `card_id` fail.
    pub fn fail_writes_for(&self, card_id: &str) {
        self.lock().failing_writes.push(card_id.to_string());
    }

    /// Moves a without-price record's last attempt `days` into the past.
    pub fn backdate_without_price(&self, card_id: &str, days: i64) {
        if let Some(record) = self.lock().without_price.get_mut(card_id) {
            record.last_attempt -= Duration::days(days);
        }
    }

    #[must_use]
    pub fn last_prices(&self, card_id: &str) -> Option<(Option<f64>, Option<f64>)> {
        self.lock()
            .cards
            .get(card_id)
            .map(|c| (c.last_price_usd, c.last_price_eur))
    }

    #[must_use]
    pub fn history_for(&self, card_id: &str) -> Vec<MemoryHistoryEntry> {
        self.lock()
            .history
            .iter()
            .filter(|h| h.card_id == card_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn without_price_record(&self, card_id: &str) -> Option<MemoryWithoutPrice> {
        self.lock().without_price.get(card_id).cloned()
    }
}

impl State {
    fn is_excluded(&self, card_id: &str, policy: WithoutPricePolicy, now: DateTime<Utc>) -> bool {
        self.without_price.get(card_id).is_some_and(|r| {
            r.attempt_count >= policy.min_attempts
                && r.last_attempt >= now - Duration::days(i64::from(policy.cooldown_days))
        })
    }

    fn retryable(&self, older_than_days: i32, limit: i64, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - Duration::days(i64::from(older_than_days));
        let mut rows: Vec<(&String, &MemoryWithoutPrice)> = self
            .without_price
            .iter()
            .filter(|(_, r)| r.last_attempt < cutoff)
            .collect();
        rows.sort_by(|a, b| {
            a.1.attempt_count
                .cmp(&b.1.attempt_count)
                .then(a.1.last_attempt.cmp(&b.1.last_attempt))
        });
        rows.into_iter()
            .take(to_take(Some(limit)))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn to_take(limit: Option<i64>) -> usize {
    limit.map_or(usize::MAX, |l| usize::try_from(l.max(0)).unwrap_or(usize::MAX))
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn get_card(&self, card_id: &str) -> Result<Option<CardRef>, DbError> {
        Ok(self.lock().cards.get(card_id).map(|c| CardRef {
            id: card_id.to_string(),
            name: c.name.clone(),
            set_id: c.set_id.clone(),
        }))
    }

    async fn select_card_ids(
        &self,
        selector: &CardSelector,
        policy: WithoutPricePolicy,
    ) -> Result<Vec<String>, DbError> {
        let state = self.lock();
        let now = Utc::now();

        let ids = match *selector {
            CardSelector::All => state.cards.keys().cloned().collect(),
            CardSelector::Missing { limit } => state
                .cards
                .iter()
                .filter(|(id, c)| {
                    c.last_price_usd.is_none()
                        && c.last_price_eur.is_none()
                        && !state.is_excluded(id, policy, now)
                })
                .map(|(id, _)| id.clone())
                .take(to_take(limit))
                .collect(),
            CardSelector::Stale {
                max_age_hours,
                limit,
            } => {
                let cutoff = now - Duration::hours(i64::from(max_age_hours));
                state
                    .cards
                    .keys()
                    .filter(|id| {
                        !state
                            .history
                            .iter()
                            .any(|h| &h.card_id == *id && h.created_at > cutoff)
                            && !state.is_excluded(id, policy, now)
                    })
                    .take(to_take(Some(limit)))
                    .cloned()
                    .collect()
            }
            CardSelector::Hot {
                min_updates,
                window_days,
                limit,
            } => {
                let cutoff = now - Duration::days(i64::from(window_days));
                let mut counts: BTreeMap<&String, i64> = BTreeMap::new();
                for entry in state.history.iter().filter(|h| h.created_at > cutoff) {
                    *counts.entry(&entry.card_id).or_default() += 1;
                }
                let mut hot: Vec<(&String, i64)> =
                    counts.into_iter().filter(|(_, n)| *n > min_updates).collect();
                hot.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
                hot.into_iter()
                    .take(to_take(Some(limit)))
                    .map(|(id, _)| id.clone())
                    .collect()
            }
            CardSelector::Retry {
                older_than_days,
                limit,
            } => state.retryable(older_than_days, limit, now),
        };

        Ok(ids)
    }

    async fn record_prices(&self, result: &AggregationResult) -> Result<usize, DbError> {
        let mut state = self.lock();
        if state.failing_writes.contains(&result.card_id) {
            return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        }

        let Some(card) = state.cards.get_mut(&result.card_id) else {
            return Err(DbError::NotFound);
        };
        card.last_price_usd = result.average_price_usd;
        card.last_price_eur = result.average_price_eur;

        let now = Utc::now();
        for quote in &result.quotes {
            state.history.push(MemoryHistoryEntry {
                card_id: result.card_id.clone(),
                price_usd: quote.price_usd,
                price_eur: quote.price_eur,
                source: quote.source.clone(),
                created_at: now,
            });
        }
        Ok(result.quotes.len())
    }

    async fn mark_without_price(
        &self,
        card_id: &str,
        last_error: &str,
        source_failures: &serde_json::Value,
    ) -> Result<i32, DbError> {
        let mut state = self.lock();
        let now = Utc::now();
        let record = state
            .without_price
            .entry(card_id.to_string())
            .and_modify(|r| {
                r.attempt_count += 1;
                r.last_attempt = now;
                r.last_error = last_error.to_string();
                r.source_failures = source_failures.clone();
            })
            .or_insert_with(|| MemoryWithoutPrice {
                attempt_count: 1,
                last_attempt: now,
                last_error: last_error.to_string(),
                source_failures: source_failures.clone(),
            });
        Ok(record.attempt_count)
    }

    async fn clear_without_price(&self, card_id: &str) -> Result<bool, DbError> {
        Ok(self.lock().without_price.remove(card_id).is_some())
    }

    async fn retryable_card_ids(
        &self,
        older_than_days: i32,
        limit: i64,
    ) -> Result<Vec<String>, DbError> {
        Ok(self.lock().retryable(older_than_days, limit, Utc::now()))
    }

    async fn excluded_card_ids(&self, policy: WithoutPricePolicy) -> Result<Vec<String>, DbError> {
        let state = self.lock();
        let now = Utc::now();
        Ok(state
            .without_price
            .keys()
            .filter(|id| state.is_excluded(id, policy, now))
            .cloned()
            .collect())
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    async fn without_price_stats(&self) -> Result<WithoutPriceStatsRow, DbError> {
        let state = self.lock();
        let records: Vec<&MemoryWithoutPrice> = state.without_price.values().collect();
        let count = |pred: &dyn Fn(i32) -> bool| {
            records.iter().filter(|r| pred(r.attempt_count)).count() as i64
        };

        let total = records.len();
        let avg_attempts = (total > 0).then(|| {
            records.iter().map(|r| f64::from(r.attempt_count)).sum::<f64>() / total as f64
        });

        Ok(WithoutPriceStatsRow {
            total_cards: total as i64,
            first_attempt: count(&|n| n == 1),
            few_attempts: count(&|n| (2..=5).contains(&n)),
            many_attempts: count(&|n| n > 5),
            avg_attempts,
            oldest_attempt: records.iter().map(|r| r.last_attempt).min(),
        })
    }
}
