use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use cardpx_core::BatchRunReport;
use cardpx_db::WithoutPriceStatsRow;
use cardpx_pricing::AggregationResult;
use cardpx_sync::{service::MANUAL_SYNC_ALL, JobStatus};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::middleware::RequestId;

use super::{map_sync_error, ApiError, ApiResponse, AppState, ResponseMeta};

/// Tracks manual runs spawned off the request path.
///
/// `shutdown` is cancelled when the server stops, which interrupts any
/// background run before its next card.
#[derive(Clone, Default)]
pub struct BackgroundRuns {
    pub shutdown: CancellationToken,
    sync_all_running: Arc<AtomicBool>,
}

impl BackgroundRuns {
    #[must_use]
    pub fn is_sync_all_running(&self) -> bool {
        self.sync_all_running.load(Ordering::SeqCst)
    }

    /// Marks a full sync as running, or returns `None` if one already is.
    fn claim_sync_all(&self) -> Option<SyncAllClaim> {
        if self.sync_all_running.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(SyncAllClaim(Arc::clone(&self.sync_all_running)))
    }
}

/// Clears the full-sync flag when the run finishes or unwinds.
struct SyncAllClaim(Arc<AtomicBool>);

impl Drop for SyncAllClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SyncMissingQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct AcceptedRun {
    task: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct SchedulerStatus {
    started: bool,
    jobs: Vec<JobStatus>,
}

pub(super) async fn sync_card(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(card_id): Path<String>,
) -> Result<Json<ApiResponse<AggregationResult>>, ApiError> {
    let data = state
        .sync
        .sync_one(&card_id)
        .await
        .map_err(|e| map_sync_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn sync_missing(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SyncMissingQuery>,
) -> Result<Json<ApiResponse<BatchRunReport>>, ApiError> {
    if query.limit.is_some_and(|l| l < 1) {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "limit must be a positive integer",
        ));
    }

    let data = state
        .sync
        .sync_missing(query.limit, &state.background.shutdown.child_token())
        .await
        .map_err(|e| map_sync_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Starts a full-catalog run and returns immediately. A second request while
/// one is in progress is refused with 409.
pub(super) async fn sync_all(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<(StatusCode, Json<ApiResponse<AcceptedRun>>), ApiError> {
    let Some(claim) = state.background.claim_sync_all() else {
        return Err(ApiError::new(req_id.0, "conflict", "a full sync is already running"));
    };

    let sync = state.sync.clone();
    let cancel = state.background.shutdown.child_token();
    tokio::spawn(async move {
        let _claim = claim;
        match sync.sync_all(&cancel).await {
            Ok(report) => tracing::info!(
                success = report.success_count,
                fail = report.fail_count,
                skipped = report.skipped_count,
                cancelled = report.cancelled,
                "background full sync finished"
            ),
            Err(e) => tracing::error!(error = %e, "background full sync failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: AcceptedRun {
                task: MANUAL_SYNC_ALL,
            },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn without_price_stats(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<WithoutPriceStatsRow>>, ApiError> {
    let data = state
        .sync
        .without_price_stats()
        .await
        .map_err(|e| map_sync_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn scheduler_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<SchedulerStatus>> {
    let data = SchedulerStatus {
        started: state.scheduler.is_started().await,
        jobs: state.scheduler.status().await,
    };

    Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_all_claim_is_exclusive_until_dropped() {
        let runs = BackgroundRuns::default();
        let claim = runs.claim_sync_all().unwrap();
        assert!(runs.is_sync_all_running());
        assert!(runs.claim_sync_all().is_none());

        drop(claim);
        assert!(!runs.is_sync_all_running());
        assert!(runs.claim_sync_all().is_some());
    }

    #[tokio::test]
    async fn panicking_sync_all_task_releases_the_claim() {
        let runs = BackgroundRuns::default();
        let claim = runs.claim_sync_all().unwrap();

        let handle = tokio::spawn(async move {
            let _claim = claim;
            panic!("run blew up");
        });
        assert!(handle.await.unwrap_err().is_panic());

        assert!(!runs.is_sync_all_running());
    }
}
