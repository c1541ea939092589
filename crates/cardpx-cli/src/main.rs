use std::sync::Arc;

use cardpx_core::{AppConfig, BatchRunReport};
use cardpx_sync::{PgPriceStore, SyncService, SyncSettings};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cardpx-cli")]
#[command(about = "Card price sync operator commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Price a single card now
    SyncOne { card_id: String },
    /// Price cards that have never had a price
    SyncMissing {
        /// Maximum number of cards; all when omitted
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        limit: Option<i64>,
    },
    /// Re-price the whole catalog
    SyncAll,
    /// Retry cards whose without-price cooldown has elapsed
    Retry,
    /// Show without-price tracker statistics
    Stats,
    /// Show a card's recent price history and without-price record
    Card {
        card_id: String,
        /// Number of history rows to show, newest first
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(i64).range(1..))]
        history: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    Ping,
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = cardpx_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = cardpx_db::PoolConfig::from_app_config(&config);
    let pool = cardpx_db::connect_pool(&config.database_url, pool_config).await?;

    match cli.command {
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            cardpx_db::ping(&pool).await?;
            println!("database ok");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = cardpx_db::run_migrations(&pool).await?;
            println!("{}", migrate_summary(applied));
        }
        Commands::SyncOne { card_id } => {
            let result = sync_service(&config, pool)?.sync_one(&card_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::SyncMissing { limit } => {
            let sync = sync_service(&config, pool)?;
            print_report(&sync.sync_missing(limit, &cancel_on_ctrl_c()).await?);
        }
        Commands::SyncAll => {
            let sync = sync_service(&config, pool)?;
            print_report(&sync.sync_all(&cancel_on_ctrl_c()).await?);
        }
        Commands::Retry => {
            let sync = sync_service(&config, pool)?;
            print_report(&sync.retry_without_price(&cancel_on_ctrl_c()).await?);
        }
        Commands::Stats => {
            let stats = sync_service(&config, pool)?.without_price_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Card { card_id, history } => {
            let Some(card) = cardpx_db::get_card(&pool, &card_id).await? else {
                anyhow::bail!("card not found: {card_id}");
            };
            let rows = cardpx_db::list_price_history(&pool, &card_id, history).await?;
            let without_price = cardpx_db::get_card_without_price(&pool, &card_id).await?;
            let summary = serde_json::json!({
                "card_id": card.id,
                "name": card.name,
                "last_price_usd": card.last_price_usd,
                "last_price_eur": card.last_price_eur,
                "history": rows,
                "without_price": without_price,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn sync_service(config: &AppConfig, pool: PgPool) -> anyhow::Result<SyncService> {
    let runner = cardpx_sync::build_runner(config, Arc::new(PgPriceStore::new(pool)))?;
    Ok(SyncService::new(runner, SyncSettings::from_app_config(config)))
}

/// First Ctrl-C stops the running batch before its next card.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("ctrl-c received, stopping after the current card");
            trigger.cancel();
        }
    });
    cancel
}

/// `run_migrations` counts only migrations applied by this call.
fn migrate_summary(applied: usize) -> String {
    match applied {
        0 => "database schema already up to date".to_string(),
        1 => "1 new migration applied".to_string(),
        n => format!("{n} new migrations applied"),
    }
}

fn print_report(report: &BatchRunReport) {
    println!(
        "{}: {} cards, {} priced, {} failed, {} skipped in {} ms ({:.1}% success){}",
        report.task_name,
        report.total,
        report.success_count,
        report.fail_count,
        report.skipped_count,
        report.duration_ms,
        report.success_rate(),
        if report.cancelled { ", cancelled" } else { "" }
    );
}
