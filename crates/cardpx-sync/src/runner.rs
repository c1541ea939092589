//! Per-card sync and sequential, throttled batch runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cardpx_core::{BatchRunReport, CardSelector, WithoutPricePolicy};
use cardpx_pricing::{AggregationResult, Aggregator};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::store::PriceStore;
use crate::tracker::WithoutPriceTracker;

const PROGRESS_EVERY: usize = 25;

/// How one card in a batch was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardOutcome {
    Success,
    Fail,
    Skipped,
}

/// Drives aggregation and persistence for single cards and batches.
///
/// A card is claimed for the duration of its sync; a second concurrent sync
/// of the same card (from another job or an HTTP request) is refused with
/// [`SyncError::CardBusy`].
pub struct BatchRunner {
    aggregator: Arc<Aggregator>,
    store: Arc<dyn PriceStore>,
    tracker: WithoutPriceTracker,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a card claim when dropped.
struct CardClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    card_id: String,
}

impl Drop for CardClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.card_id);
    }
}

impl BatchRunner {
    #[must_use]
    pub fn new(
        aggregator: Arc<Aggregator>,
        store: Arc<dyn PriceStore>,
        policy: WithoutPricePolicy,
    ) -> Self {
        let tracker = WithoutPriceTracker::new(Arc::clone(&store), policy);
        Self {
            aggregator,
            store,
            tracker,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &WithoutPriceTracker {
        &self.tracker
    }

    fn claim(&self, card_id: &str) -> Option<CardClaim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(card_id.to_string()) {
            return None;
        }
        Some(CardClaim {
            in_flight: &self.in_flight,
            card_id: card_id.to_string(),
        })
    }

    /// Prices one card and persists the outcome.
    ///
    /// With at least one quote, every quote is appended to the history, the
    /// card's last prices are overwritten and any without-price record is
    /// cleared. With none, the failure is recorded in the tracker and no
    /// history is written.
    ///
    /// # Errors
    ///
    /// - [`SyncError::CardBusy`] if another run is pricing the card.
    /// - [`SyncError::CardNotFound`] if the card is not in the catalog.
    /// - [`SyncError::Db`] / [`SyncError::Encode`] if persisting fails.
    pub async fn sync_card(&self, card_id: &str) -> Result<AggregationResult, SyncError> {
        let Some(_claim) = self.claim(card_id) else {
            return Err(SyncError::CardBusy(card_id.to_string()));
        };

        let card = self
            .store
            .get_card(card_id)
            .await?
            .ok_or_else(|| SyncError::CardNotFound(card_id.to_string()))?;

        let result = self
            .aggregator
            .aggregate(&card.id, Some(&card.name), card.set_id.as_deref())
            .await;

        if result.has_price() {
            let rows = self.store.record_prices(&result).await?;
            self.tracker.mark_recovered(&card.id).await?;
            tracing::info!(
                card_id,
                sources = result.source_count,
                rows,
                price_usd = result.average_price_usd,
                price_eur = result.average_price_eur,
                "card price updated"
            );
        } else {
            let attempts = self
                .tracker
                .mark_failed(&card.id, &result.failure_summary(), &result.source_status)
                .await?;
            tracing::info!(
                card_id,
                attempts,
                provider_errors = result.has_provider_errors(),
                "no price found for card"
            );
        }

        Ok(result)
    }

    async fn process(&self, task_name: &str, card_id: &str) -> CardOutcome {
        match self.sync_card(card_id).await {
            Ok(result) if result.has_price() => CardOutcome::Success,
            Ok(result) if result.has_provider_errors() => CardOutcome::Fail,
            Ok(_) => CardOutcome::Skipped,
            Err(SyncError::CardNotFound(_)) => {
                tracing::warn!(task = task_name, card_id, "card vanished from catalog, skipping");
                CardOutcome::Skipped
            }
            Err(SyncError::CardBusy(_)) => {
                tracing::warn!(task = task_name, card_id, "card already being synced, skipping");
                CardOutcome::Skipped
            }
            Err(e) => {
                tracing::warn!(task = task_name, card_id, error = %e, "card sync failed");
                CardOutcome::Fail
            }
        }
    }

    /// Syncs every card the selector yields, one at a time, sleeping
    /// `throttle` between cards (not after the last one).
    ///
    /// Card-level failures are counted and never stop the batch.
    /// Cancellation is checked before each card and interrupts the throttle
    /// sleep; the report then covers the cards processed so far and has
    /// `cancelled` set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] only if selecting the cards fails.
    pub async fn run_batch(
        &self,
        task_name: &str,
        selector: &CardSelector,
        throttle: Duration,
        cancel: &CancellationToken,
    ) -> Result<BatchRunReport, SyncError> {
        let started = Instant::now();
        let mut report = BatchRunReport::new(task_name);

        let card_ids = self
            .store
            .select_card_ids(selector, self.tracker.policy())
            .await?;
        report.total = card_ids.len();

        tracing::info!(
            task = task_name,
            selector = selector.label(),
            total = report.total,
            throttle = ?throttle,
            "batch run starting"
        );

        for (index, card_id) in card_ids.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.process(task_name, card_id).await {
                CardOutcome::Success => report.success_count += 1,
                CardOutcome::Fail => report.fail_count += 1,
                CardOutcome::Skipped => report.skipped_count += 1,
            }

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 {
                tracing::info!(
                    task = task_name,
                    done,
                    total = report.total,
                    success = report.success_count,
                    fail = report.fail_count,
                    skipped = report.skipped_count,
                    "batch progress"
                );
            }

            if done < report.total && !throttle.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(throttle) => {}
                    () = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if report.cancelled {
            tracing::warn!(
                task = task_name,
                processed = report.processed(),
                total = report.total,
                "batch run cancelled"
            );
        }
        tracing::info!(
            task = task_name,
            total = report.total,
            success = report.success_count,
            fail = report.fail_count,
            skipped = report.skipped_count,
            success_rate = report.success_rate(),
            duration_ms = report.duration_ms,
            "batch run complete"
        );

        Ok(report)
    }
}
