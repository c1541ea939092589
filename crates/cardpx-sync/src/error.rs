use cardpx_db::DbError;
use cardpx_pricing::{AggregateError, ProviderError};
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("card not found: {0}")]
    CardNotFound(String),

    /// Another run is currently pricing this card.
    #[error("card {0} is already being synced")]
    CardBusy(String),

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("failed to encode source status: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Scheduler(#[from] JobSchedulerError),
}
