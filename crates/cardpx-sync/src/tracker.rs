//! Durable record of cards that aggregation could not price.
//!
//! Normal selection skips a card once it has failed `min_attempts` times and
//! its last attempt is still inside the cooldown window; the weekly retry job
//! revisits cards whose last attempt has aged past the window.

use std::collections::BTreeMap;
use std::sync::Arc;

use cardpx_core::WithoutPricePolicy;
use cardpx_db::WithoutPriceStatsRow;
use cardpx_pricing::SourceStatus;

use crate::error::SyncError;
use crate::store::PriceStore;

#[derive(Clone)]
pub struct WithoutPriceTracker {
    store: Arc<dyn PriceStore>,
    policy: WithoutPricePolicy,
}

impl WithoutPriceTracker {
    #[must_use]
    pub fn new(store: Arc<dyn PriceStore>, policy: WithoutPricePolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub fn policy(&self) -> WithoutPricePolicy {
        self.policy
    }

    /// Records a total-failure aggregation. Returns the new attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Encode`] if the status map cannot be serialized,
    /// or [`SyncError::Db`] if the upsert fails.
    pub async fn mark_failed(
        &self,
        card_id: &str,
        reason: &str,
        source_status: &BTreeMap<String, SourceStatus>,
    ) -> Result<i32, SyncError> {
        let source_failures = serde_json::to_value(source_status)?;
        let attempts = self
            .store
            .mark_without_price(card_id, reason, &source_failures)
            .await?;

        if attempts >= self.policy.min_attempts {
            tracing::info!(
                card_id,
                attempts,
                cooldown_days = self.policy.cooldown_days,
                "card excluded from missing-price runs until cooldown elapses"
            );
        } else {
            tracing::debug!(card_id, attempts, "recorded card without price");
        }
        Ok(attempts)
    }

    /// Clears the card's record after a successful aggregation. A card with
    /// no record is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if the delete fails.
    pub async fn mark_recovered(&self, card_id: &str) -> Result<bool, SyncError> {
        let removed = self.store.clear_without_price(card_id).await?;
        if removed {
            tracing::info!(card_id, "card recovered a price");
        }
        Ok(removed)
    }

    /// Up to `limit` cards whose last attempt is older than
    /// `older_than_days`, least-tried first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if the query fails.
    pub async fn select_retryable(
        &self,
        older_than_days: i32,
        limit: i64,
    ) -> Result<Vec<String>, SyncError> {
        Ok(self
            .store
            .retryable_card_ids(older_than_days, limit)
            .await?)
    }

    /// Cards that normal selection must currently skip.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if the query fails.
    pub async fn select_excluded(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.store.excluded_card_ids(self.policy).await?)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if the query fails.
    pub async fn stats(&self) -> Result<WithoutPriceStatsRow, SyncError> {
        Ok(self.store.without_price_stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use cardpx_pricing::FailureKind;

    use super::*;
    use crate::store::MemoryStore;

    fn tracker(store: &Arc<MemoryStore>) -> WithoutPriceTracker {
        WithoutPriceTracker::new(
            Arc::clone(store) as Arc<dyn PriceStore>,
            WithoutPricePolicy {
                min_attempts: 2,
                cooldown_days: 30,
            },
        )
    }

    fn absent_status() -> BTreeMap<String, SourceStatus> {
        BTreeMap::from([(
            "tcgplayer".to_string(),
            SourceStatus::Failure {
                kind: FailureKind::Absent,
                reason: "no price".to_string(),
            },
        )])
    }

    #[tokio::test]
    async fn mark_failed_increments_from_one() {
        let store = Arc::new(MemoryStore::new());
        store.insert_card("a", "Pikachu");
        let tracker = tracker(&store);

        assert_eq!(tracker.mark_failed("a", "none", &absent_status()).await.unwrap(), 1);
        assert_eq!(tracker.mark_failed("a", "again", &absent_status()).await.unwrap(), 2);

        let record = store.without_price_record("a").unwrap();
        assert_eq!(record.last_error, "again");
        assert_eq!(record.source_failures["tcgplayer"]["status"], "failure");
        assert_eq!(record.source_failures["tcgplayer"]["kind"], "absent");
    }

    #[tokio::test]
    async fn mark_recovered_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        tracker.mark_failed("a", "none", &absent_status()).await.unwrap();

        assert!(tracker.mark_recovered("a").await.unwrap());
        assert!(!tracker.mark_recovered("a").await.unwrap());
        assert!(store.without_price_record("a").is_none());
    }

    #[tokio::test]
    async fn excluded_requires_threshold_and_fresh_attempt() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        tracker.mark_failed("once", "x", &absent_status()).await.unwrap();
        for _ in 0..2 {
            tracker.mark_failed("twice", "x", &absent_status()).await.unwrap();
            tracker.mark_failed("stale", "x", &absent_status()).await.unwrap();
        }
        store.backdate_without_price("stale", 31);

        let excluded = tracker.select_excluded().await.unwrap();
        assert_eq!(excluded, vec!["twice".to_string()]);
    }

    #[tokio::test]
    async fn retryable_prefers_least_tried() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        for _ in 0..4 {
            tracker.mark_failed("often", "x", &absent_status()).await.unwrap();
        }
        tracker.mark_failed("rarely", "x", &absent_status()).await.unwrap();
        tracker.mark_failed("recent", "x", &absent_status()).await.unwrap();
        store.backdate_without_price("often", 40);
        store.backdate_without_price("rarely", 35);

        let ids = tracker.select_retryable(30, 10).await.unwrap();
        assert_eq!(ids, vec!["rarely".to_string(), "often".to_string()]);
    }

    #[tokio::test]
    async fn stats_bucket_attempt_counts() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        tracker.mark_failed("one", "x", &absent_status()).await.unwrap();
        for _ in 0..3 {
            tracker.mark_failed("three", "x", &absent_status()).await.unwrap();
        }

        let stats = tracker.stats().await.unwrap();
        assert_eq!(stats.total_cards, 2);
        assert_eq!(stats.first_attempt, 1);
        assert_eq!(stats.few_attempts, 1);
        assert_eq!(stats.many_attempts, 0);
        assert!((stats.avg_attempts.unwrap() - 2.0).abs() < 1e-9);
    }
}
