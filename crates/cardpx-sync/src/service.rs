//! Manual sync operations exposed to the HTTP API and the CLI.

use std::sync::Arc;
use std::time::Duration;

use cardpx_core::{AppConfig, BatchRunReport, CardSelector, WithoutPricePolicy};
use cardpx_db::WithoutPriceStatsRow;
use cardpx_pricing::AggregationResult;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::runner::BatchRunner;

pub const SYNC_ONE_CARD: &str = "SYNC_ONE_CARD";
pub const MANUAL_SYNC_MISSING: &str = "MANUAL_SYNC_MISSING";
pub const MANUAL_SYNC_ALL: &str = "MANUAL_SYNC_ALL";
pub const MANUAL_RETRY_WITHOUT_PRICE: &str = "MANUAL_RETRY_WITHOUT_PRICE";

/// Throttles and retry window used by manual runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub throttle: Duration,
    pub retry_throttle: Duration,
    pub retry_older_than_days: i32,
    pub retry_limit: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(1_500),
            retry_throttle: Duration::from_millis(3_000),
            retry_older_than_days: WithoutPricePolicy::default().cooldown_days,
            retry_limit: 500,
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            throttle: Duration::from_millis(config.sync_throttle_ms),
            retry_throttle: Duration::from_millis(config.retry_throttle_ms),
            retry_older_than_days: config.without_price_cooldown_days,
            retry_limit: config.retry_batch_limit,
        }
    }
}

#[derive(Clone)]
pub struct SyncService {
    runner: Arc<BatchRunner>,
    settings: SyncSettings,
}

impl SyncService {
    #[must_use]
    pub fn new(runner: Arc<BatchRunner>, settings: SyncSettings) -> Self {
        Self { runner, settings }
    }

    #[must_use]
    pub fn runner(&self) -> &Arc<BatchRunner> {
        &self.runner
    }

    #[must_use]
    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Prices a single card immediately.
    ///
    /// # Errors
    ///
    /// See [`BatchRunner::sync_card`].
    pub async fn sync_one(&self, card_id: &str) -> Result<AggregationResult, SyncError> {
        tracing::info!(task = SYNC_ONE_CARD, card_id, "manual card sync requested");
        self.runner.sync_card(card_id).await
    }

    /// Prices cards that have never had a price, skipping excluded cards.
    /// `None` processes all of them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if card selection fails.
    pub async fn sync_missing(
        &self,
        limit: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<BatchRunReport, SyncError> {
        self.runner
            .run_batch(
                MANUAL_SYNC_MISSING,
                &CardSelector::Missing { limit },
                self.settings.throttle,
                cancel,
            )
            .await
    }

    /// Re-prices the whole catalog in id order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if card selection fails.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<BatchRunReport, SyncError> {
        self.runner
            .run_batch(
                MANUAL_SYNC_ALL,
                &CardSelector::All,
                self.settings.throttle,
                cancel,
            )
            .await
    }

    /// Revisits without-price cards whose cooldown has elapsed, with the
    /// slower retry throttle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if card selection fails.
    pub async fn retry_without_price(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BatchRunReport, SyncError> {
        self.runner
            .run_batch(
                MANUAL_RETRY_WITHOUT_PRICE,
                &CardSelector::Retry {
                    older_than_days: self.settings.retry_older_than_days,
                    limit: self.settings.retry_limit,
                },
                self.settings.retry_throttle,
                cancel,
            )
            .await
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Db`] if the query fails.
    pub async fn without_price_stats(&self) -> Result<WithoutPriceStatsRow, SyncError> {
        self.runner.tracker().stats().await
    }
}
