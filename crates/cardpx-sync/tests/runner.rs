//! Batch runner behaviour against the in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cardpx_core::{CardSelector, WithoutPricePolicy};
use cardpx_pricing::{Aggregator, EurUsdRate, FixedRate, PriceProvider, ProviderError, Quote};
use cardpx_sync::{BatchRunner, MemoryStore, PriceStore, SyncError, SyncService, SyncSettings};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Answer {
    Usd(f64),
    Absent,
    Error,
}

/// Answers per card id; unknown cards are absent.
struct ScriptedProvider {
    answers: HashMap<&'static str, Answer>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(answers: &[(&'static str, Answer)]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl PriceProvider for ScriptedProvider {
    fn source(&self) -> &str {
        "scripted"
    }

    async fn fetch_price(
        &self,
        card_id: &str,
        _card_name: Option<&str>,
    ) -> Result<Option<Quote>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.answers.get(card_id).copied().unwrap_or(Answer::Absent) {
            Answer::Usd(p) => Ok(Some(Quote::usd("scripted", p))),
            Answer::Absent => Ok(None),
            Answer::Error => Err(ProviderError::UnexpectedStatus {
                status: 503,
                url: format!("http://scripted/cards/{card_id}"),
            }),
        }
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    provider: Arc<ScriptedProvider>,
    runner: Arc<BatchRunner>,
}

fn runner_for(store: &Arc<MemoryStore>, provider: &Arc<ScriptedProvider>) -> Arc<BatchRunner> {
    let aggregator = Aggregator::new(
        vec![Arc::clone(provider) as Arc<dyn PriceProvider>],
        Arc::new(FixedRate(EurUsdRate::new(1.1).unwrap())),
        Duration::from_secs(2),
    )
    .unwrap();
    Arc::new(BatchRunner::new(
        Arc::new(aggregator),
        Arc::clone(store) as Arc<dyn PriceStore>,
        WithoutPricePolicy {
            min_attempts: 2,
            cooldown_days: 30,
        },
    ))
}

fn harness(provider: ScriptedProvider, cards: &[&str]) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for id in cards {
        store.insert_card(id, &format!("Card {id}"));
    }
    let provider = Arc::new(provider);
    let runner = runner_for(&store, &provider);
    Harness {
        store,
        provider,
        runner,
    }
}

#[tokio::test]
async fn batch_counts_success_fail_and_skip() {
    let h = harness(
        ScriptedProvider::new(&[("a", Answer::Usd(11.0)), ("b", Answer::Error)]),
        &["a", "b", "c"],
    );

    let report = h
        .runner
        .run_batch("TEST", &CardSelector::All, Duration::ZERO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.fail_count, 1);
    assert_eq!(report.skipped_count, 1);
    assert!(!report.cancelled);

    let history = h.store.history_for("a");
    assert_eq!(history.len(), 1);
    assert!((history[0].price_eur - 10.0).abs() < 0.01);
    assert_eq!(h.store.last_prices("a"), Some((Some(11.0), Some(history[0].price_eur))));

    assert!(h.store.history_for("b").is_empty());
    assert!(h.store.history_for("c").is_empty());
    assert_eq!(h.store.without_price_record("b").unwrap().attempt_count, 1);
    assert_eq!(h.store.without_price_record("c").unwrap().attempt_count, 1);
    assert!(h.store.without_price_record("a").is_none());
}

#[tokio::test]
async fn resyncing_appends_history_and_overwrites_last_price() {
    let h = harness(ScriptedProvider::new(&[("a", Answer::Usd(4.4))]), &["a"]);

    h.runner.sync_card("a").await.unwrap();
    h.runner.sync_card("a").await.unwrap();

    assert_eq!(h.store.history_for("a").len(), 2);
    let (usd, _) = h.store.last_prices("a").unwrap();
    assert_eq!(usd, Some(4.4));
}

#[tokio::test]
async fn success_clears_an_existing_without_price_record() {
    let h = harness(ScriptedProvider::new(&[]), &["a"]);
    h.runner.sync_card("a").await.unwrap();
    assert!(h.store.without_price_record("a").is_some());

    let recovered = Arc::new(ScriptedProvider::new(&[("a", Answer::Usd(2.0))]));
    let runner = runner_for(&h.store, &recovered);

    let result = runner.sync_card("a").await.unwrap();
    assert!(result.has_price());
    assert!(h.store.without_price_record("a").is_none());
}

#[tokio::test]
async fn unknown_card_is_not_found() {
    let h = harness(ScriptedProvider::new(&[]), &[]);

    let err = h.runner.sync_card("ghost").await.unwrap_err();
    assert!(matches!(err, SyncError::CardNotFound(id) if id == "ghost"));
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn store_write_failure_counts_as_fail_and_batch_continues() {
    let h = harness(
        ScriptedProvider::new(&[("a", Answer::Usd(1.0)), ("b", Answer::Usd(2.0))]),
        &["a", "b"],
    );
    h.store.fail_writes_for("a");

    let report = h
        .runner
        .run_batch("TEST", &CardSelector::All, Duration::ZERO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.fail_count, 1);
    assert_eq!(report.success_count, 1);
    assert!(h.store.history_for("a").is_empty());
    assert_eq!(h.store.history_for("b").len(), 1);
}

#[tokio::test]
async fn cancelled_token_stops_before_first_card() {
    let h = harness(ScriptedProvider::new(&[("a", Answer::Usd(1.0))]), &["a", "b"]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .runner
        .run_batch("TEST", &CardSelector::All, Duration::ZERO, &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.total, 2);
    assert_eq!(report.processed(), 0);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_interrupts_throttle_and_keeps_completed_work() {
    let h = harness(
        ScriptedProvider::new(&[("a", Answer::Usd(1.0)), ("b", Answer::Usd(2.0))]),
        &["a", "b", "c"],
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let report = h
        .runner
        .run_batch("TEST", &CardSelector::All, Duration::from_secs(30), &cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.cancelled);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.processed(), 1);
    assert_eq!(h.store.history_for("a").len(), 1);
}

#[tokio::test]
async fn concurrent_sync_of_same_card_is_refused() {
    let mut provider = ScriptedProvider::new(&[("a", Answer::Usd(1.0))]);
    provider.delay = Duration::from_millis(300);
    let h = harness(provider, &["a"]);

    let first = {
        let runner = Arc::clone(&h.runner);
        tokio::spawn(async move { runner.sync_card("a").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h.runner.sync_card("a").await;

    assert!(matches!(second, Err(SyncError::CardBusy(_))));
    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.store.history_for("a").len(), 1);
}

#[tokio::test]
async fn missing_sync_skips_excluded_cards() {
    let h = harness(ScriptedProvider::new(&[]), &["a", "b"]);
    // two failures put "a" over the exclusion threshold
    h.runner.sync_card("a").await.unwrap();
    h.runner.sync_card("a").await.unwrap();

    let service = SyncService::new(
        Arc::clone(&h.runner),
        SyncSettings {
            throttle: Duration::ZERO,
            retry_throttle: Duration::ZERO,
            ..SyncSettings::default()
        },
    );
    let report = service
        .sync_missing(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(h.store.without_price_record("b").unwrap().attempt_count, 1);
    assert_eq!(h.store.without_price_record("a").unwrap().attempt_count, 2);
}

#[tokio::test]
async fn retry_revisits_cards_past_cooldown() {
    let h = harness(ScriptedProvider::new(&[("old", Answer::Usd(3.0))]), &["old", "new"]);
    for id in ["old", "new"] {
        h.store
            .mark_without_price(id, "no price", &serde_json::json!({}))
            .await
            .unwrap();
    }
    h.store.backdate_without_price("old", 31);

    let service = SyncService::new(
        Arc::clone(&h.runner),
        SyncSettings {
            throttle: Duration::ZERO,
            retry_throttle: Duration::ZERO,
            retry_older_than_days: 30,
            retry_limit: 100,
        },
    );
    let report = service
        .retry_without_price(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.success_count, 1);
    assert!(h.store.without_price_record("old").is_none());
    assert!(h.store.without_price_record("new").is_some());

    let stats = service.without_price_stats().await.unwrap();
    assert_eq!(stats.total_cards, 1);
}
