//! Live integration tests for cardpx-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/cardpx-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use cardpx_db::{
    clear_card_without_price, get_card, get_card_without_price, list_all_card_ids,
    list_cards_missing_price, list_excluded_cards, list_hot_cards, list_price_history,
    list_retryable_cards, list_stale_cards, mark_card_without_price, record_price_observations,
    without_price_stats, DbError, NewPriceObservation,
};
use rust_decimal::Decimal;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_test_card(pool: &sqlx::PgPool, id: &str) {
    sqlx::query("INSERT INTO cards (id, name, set_id) VALUES ($1, $2, 'base1')")
        .bind(id)
        .bind(format!("Card {id}"))
        .execute(pool)
        .await
        .unwrap_or_else(|e| panic!("insert_test_card failed for '{id}': {e}"));
}

async fn backdate_without_price(pool: &sqlx::PgPool, id: &str, days: i32) {
    sqlx::query(
        "UPDATE cards_without_price \
         SET last_attempt = NOW() - make_interval(days => $2) \
         WHERE card_id = $1",
    )
    .bind(id)
    .bind(days)
    .execute(pool)
    .await
    .expect("backdate failed");
}

fn quote(source: &str, usd: f64, eur: f64) -> NewPriceObservation {
    NewPriceObservation {
        source: source.to_string(),
        price_usd: Some(usd),
        price_eur: Some(eur),
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

// ---------------------------------------------------------------------------
// Section 1: price history
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn record_price_observations_writes_one_row_per_quote(pool: sqlx::PgPool) {
    insert_test_card(&pool, "base1-4").await;

    let inserted = record_price_observations(
        &pool,
        "base1-4",
        &[quote("TCGPlayer", 11.0, 10.0), quote("Cardmarket", 13.2, 12.0)],
        Some(12.1),
        Some(11.0),
    )
    .await
    .expect("record failed");
    assert_eq!(inserted, 2);

    let history = list_price_history(&pool, "base1-4", 10)
        .await
        .expect("list failed");
    assert_eq!(history.len(), 2);
    let mut sources: Vec<_> = history.iter().map(|h| h.source.as_str()).collect();
    sources.sort_unstable();
    assert_eq!(sources, vec!["Cardmarket", "TCGPlayer"]);

    let card = get_card(&pool, "base1-4").await.unwrap().expect("card");
    assert_eq!(card.last_price_usd, Some(dec("12.10")));
    assert_eq!(card.last_price_eur, Some(dec("11.00")));
}

#[sqlx::test(migrations = "../../migrations")]
async fn record_price_observations_rounds_to_two_decimals(pool: sqlx::PgPool) {
    insert_test_card(&pool, "base1-5").await;

    record_price_observations(
        &pool,
        "base1-5",
        &[quote("TCGPlayer", 11.0, 10.185_185)],
        Some(11.0),
        Some(10.185_185),
    )
    .await
    .expect("record failed");

    let card = get_card(&pool, "base1-5").await.unwrap().expect("card");
    assert_eq!(card.last_price_eur, Some(dec("10.19")));
}

#[sqlx::test(migrations = "../../migrations")]
async fn record_price_observations_unknown_card_writes_nothing(pool: sqlx::PgPool) {
    let result = record_price_observations(
        &pool,
        "nope",
        &[quote("TCGPlayer", 1.0, 1.0)],
        Some(1.0),
        Some(1.0),
    )
    .await;
    assert!(matches!(result, Err(DbError::NotFound)));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn repeated_recording_appends_and_overwrites(pool: sqlx::PgPool) {
    insert_test_card(&pool, "base1-6").await;
    for _ in 0..2 {
        record_price_observations(
            &pool,
            "base1-6",
            &[quote("TCGPlayer", 5.0, 4.5)],
            Some(5.0),
            Some(4.5),
        )
        .await
        .expect("record failed");
    }

    let history = list_price_history(&pool, "base1-6", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    let card = get_card(&pool, "base1-6").await.unwrap().unwrap();
    assert_eq!(card.last_price_usd, Some(dec("5.00")));
}

// ---------------------------------------------------------------------------
// Section 2: without-price tracker
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn mark_without_price_increments_attempts(pool: sqlx::PgPool) {
    insert_test_card(&pool, "base1-7").await;
    let failures = serde_json::json!({"TCGPlayer": {"status": "failure"}});

    let first = mark_card_without_price(&pool, "base1-7", "no price", &failures)
        .await
        .unwrap();
    let second = mark_card_without_price(&pool, "base1-7", "still none", &failures)
        .await
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);

    let row = get_card_without_price(&pool, "base1-7")
        .await
        .unwrap()
        .expect("record");
    assert_eq!(row.last_error.as_deref(), Some("still none"));
    assert_eq!(row.source_failures, failures);
}

#[sqlx::test(migrations = "../../migrations")]
async fn clear_without_price_is_idempotent(pool: sqlx::PgPool) {
    insert_test_card(&pool, "base1-8").await;
    mark_card_without_price(&pool, "base1-8", "x", &serde_json::json!({}))
        .await
        .unwrap();

    assert!(clear_card_without_price(&pool, "base1-8").await.unwrap());
    assert!(!clear_card_without_price(&pool, "base1-8").await.unwrap());
    assert!(get_card_without_price(&pool, "base1-8")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn excluded_cards_respect_attempt_threshold_and_cooldown(pool: sqlx::PgPool) {
    for id in ["once", "twice", "twice-old"] {
        insert_test_card(&pool, id).await;
    }
    let empty = serde_json::json!({});
    mark_card_without_price(&pool, "once", "x", &empty).await.unwrap();
    for _ in 0..2 {
        mark_card_without_price(&pool, "twice", "x", &empty).await.unwrap();
        mark_card_without_price(&pool, "twice-old", "x", &empty)
            .await
            .unwrap();
    }
    backdate_without_price(&pool, "twice-old", 40).await;

    let excluded = list_excluded_cards(&pool, 2, 30).await.unwrap();
    assert_eq!(excluded, vec!["twice".to_string()]);

    let missing = list_cards_missing_price(&pool, 2, 30, None).await.unwrap();
    assert_eq!(missing, vec!["once".to_string(), "twice-old".to_string()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn retryable_cards_orders_least_tried_first(pool: sqlx::PgPool) {
    for id in ["a", "b", "fresh"] {
        insert_test_card(&pool, id).await;
    }
    let empty = serde_json::json!({});
    for _ in 0..3 {
        mark_card_without_price(&pool, "a", "x", &empty).await.unwrap();
    }
    mark_card_without_price(&pool, "b", "x", &empty).await.unwrap();
    mark_card_without_price(&pool, "fresh", "x", &empty).await.unwrap();
    backdate_without_price(&pool, "a", 10).await;
    backdate_without_price(&pool, "b", 10).await;

    let ids = list_retryable_cards(&pool, 7, 10).await.unwrap();
    assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);

    let limited = list_retryable_cards(&pool, 7, 1).await.unwrap();
    assert_eq!(limited, vec!["b".to_string()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn without_price_stats_buckets_attempts(pool: sqlx::PgPool) {
    let empty = serde_json::json!({});
    for (id, attempts) in [("one", 1), ("three", 3), ("seven", 7)] {
        insert_test_card(&pool, id).await;
        for _ in 0..attempts {
            mark_card_without_price(&pool, id, "x", &empty).await.unwrap();
        }
    }

    let stats = without_price_stats(&pool).await.unwrap();
    assert_eq!(stats.total_cards, 3);
    assert_eq!(stats.first_attempt, 1);
    assert_eq!(stats.few_attempts, 1);
    assert_eq!(stats.many_attempts, 1);
    let avg = stats.avg_attempts.expect("avg present");
    assert!((avg - 11.0 / 3.0).abs() < 1e-9);
    assert!(stats.oldest_attempt.is_some());
}

// ---------------------------------------------------------------------------
// Section 3: selection queries
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn missing_price_skips_priced_cards_and_honours_limit(pool: sqlx::PgPool) {
    for id in ["c1", "c2", "c3"] {
        insert_test_card(&pool, id).await;
    }
    record_price_observations(&pool, "c2", &[quote("TCGPlayer", 1.0, 1.0)], Some(1.0), Some(1.0))
        .await
        .unwrap();

    let all_missing = list_cards_missing_price(&pool, 2, 30, None).await.unwrap();
    assert_eq!(all_missing, vec!["c1".to_string(), "c3".to_string()]);

    let limited = list_cards_missing_price(&pool, 2, 30, Some(1)).await.unwrap();
    assert_eq!(limited, vec!["c1".to_string()]);

    let all = list_all_card_ids(&pool).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_cards_exclude_recently_priced(pool: sqlx::PgPool) {
    for id in ["fresh", "old"] {
        insert_test_card(&pool, id).await;
    }
    record_price_observations(&pool, "fresh", &[quote("TCGPlayer", 1.0, 1.0)], Some(1.0), Some(1.0))
        .await
        .unwrap();

    let stale = list_stale_cards(&pool, 6, 2, 30, 10).await.unwrap();
    assert_eq!(stale, vec!["old".to_string()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn hot_cards_require_more_than_min_updates(pool: sqlx::PgPool) {
    for id in ["busy", "quiet"] {
        insert_test_card(&pool, id).await;
    }
    for _ in 0..3 {
        record_price_observations(
            &pool,
            "busy",
            &[quote("TCGPlayer", 1.0, 1.0)],
            Some(1.0),
            Some(1.0),
        )
        .await
        .unwrap();
    }
    record_price_observations(&pool, "quiet", &[quote("TCGPlayer", 1.0, 1.0)], Some(1.0), Some(1.0))
        .await
        .unwrap();

    let hot = list_hot_cards(&pool, 2, 7, 10).await.unwrap();
    assert_eq!(hot, vec!["busy".to_string()]);
}
