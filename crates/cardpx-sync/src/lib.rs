//! Price synchronization engine: card selection, per-card aggregation and
//! persistence, the without-price tracker and the recurring job scheduler.

pub mod bootstrap;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tracker;

pub use bootstrap::{build_providers, build_runner, http_config, without_price_policy};
pub use error::SyncError;
pub use runner::BatchRunner;
pub use scheduler::{JobStatus, SyncScheduler};
pub use service::{SyncService, SyncSettings};
pub use store::{CardRef, MemoryStore, PgPriceStore, PriceStore};
pub use tracker::WithoutPriceTracker;
