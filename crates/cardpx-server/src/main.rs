mod api;
mod middleware;

use std::sync::Arc;

use cardpx_core::{default_jobs, BatchRunReport, CardSelector};
use cardpx_sync::{BatchRunner, PgPriceStore, SyncScheduler, SyncService, SyncSettings};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, AppState, BackgroundRuns};

const INITIAL_FILL: &str = "INITIAL_FILL";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(cardpx_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(env = %config.env, bind_addr = %config.bind_addr, "starting cardpx-server");

    let pool_config = cardpx_db::PoolConfig::from_app_config(&config);
    let pool = cardpx_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = cardpx_db::run_migrations(&pool).await?;
    tracing::info!(applied, "database migrations complete");

    let store = Arc::new(PgPriceStore::new(pool.clone()));
    let runner = cardpx_sync::build_runner(&config, store)?;
    let sync = SyncService::new(Arc::clone(&runner), SyncSettings::from_app_config(&config));

    let mut scheduler = SyncScheduler::new(Arc::clone(&runner));
    for job in default_jobs(&config) {
        scheduler.register(job)?;
    }
    let scheduler = Arc::new(scheduler);
    if config.scheduler_enabled {
        scheduler.start().await?;
    } else {
        tracing::warn!("scheduler disabled by configuration");
    }

    let background = BackgroundRuns::default();
    if config.initial_fill {
        spawn_initial_fill(
            Arc::clone(&runner),
            config.initial_fill_limit,
            std::time::Duration::from_millis(config.sync_throttle_ms),
            background.shutdown.child_token(),
        );
    }

    let app = build_app(AppState {
        pool,
        sync,
        scheduler: Arc::clone(&scheduler),
        background: background.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.shutdown.cancel();
    scheduler.stop().await?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Prices never-priced cards once at startup without blocking the listener.
fn spawn_initial_fill(
    runner: Arc<BatchRunner>,
    limit: Option<i64>,
    throttle: std::time::Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let selector = CardSelector::Missing { limit };
        match runner
            .run_batch(INITIAL_FILL, &selector, throttle, &cancel)
            .await
        {
            Ok(BatchRunReport { total: 0, .. }) => {
                tracing::info!("initial fill: every card already has a price");
            }
            Ok(report) => tracing::info!(
                success = report.success_count,
                fail = report.fail_count,
                skipped = report.skipped_count,
                "initial fill finished"
            ),
            Err(e) => tracing::error!(error = %e, "initial fill failed"),
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
