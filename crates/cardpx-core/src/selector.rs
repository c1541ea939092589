//! Card-selection policies and batch run reports shared by the sync engine,
//! the HTTP surface and the CLI.

use serde::Serialize;

/// Which cards a batch run processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardSelector {
    /// Every card in the catalog, ordered by id.
    All,
    /// Cards that have never received a price, minus tracker-excluded cards.
    Missing { limit: Option<i64> },
    /// Cards without a history row younger than `max_age_hours`.
    Stale { max_age_hours: i32, limit: i64 },
    /// Cards updated more than `min_updates` times in the last `window_days`.
    Hot {
        min_updates: i64,
        window_days: i32,
        limit: i64,
    },
    /// Cards in the without-price table whose last attempt is older than
    /// `older_than_days`, least-tried first.
    Retry { older_than_days: i32, limit: i64 },
}

impl CardSelector {
    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Missing { .. } => "missing",
            Self::Stale { .. } => "stale",
            Self::Hot { .. } => "hot",
            Self::Retry { .. } => "retry",
        }
    }
}

/// Exclusion threshold for chronically priceless cards.
///
/// A card with at least `min_attempts` recorded failures whose last attempt
/// falls inside the last `cooldown_days` is skipped by normal selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WithoutPricePolicy {
    pub min_attempts: i32,
    pub cooldown_days: i32,
}

impl Default for WithoutPricePolicy {
    fn default() -> Self {
        Self {
            min_attempts: 2,
            cooldown_days: 30,
        }
    }
}

/// Counts produced by one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRunReport {
    pub task_name: String,
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped_count: usize,
    pub duration_ms: u64,
    /// True when the run stopped early on a cancellation request.
    pub cancelled: bool,
}

impl BatchRunReport {
    #[must_use]
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Self::default()
        }
    }

    /// Cards actually visited, which is less than `total` after cancellation.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.success_count + self.fail_count + self.skipped_count
    }

    /// Percentage of visited cards that produced a price.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        self.success_count as f64 / processed as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_handles_empty_run() {
        let report = BatchRunReport::new("noop");
        assert!(report.success_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn success_rate_uses_processed_cards() {
        let report = BatchRunReport {
            task_name: "t".to_string(),
            total: 10,
            success_count: 1,
            fail_count: 1,
            skipped_count: 2,
            duration_ms: 0,
            cancelled: true,
        };
        assert_eq!(report.processed(), 4);
        assert!((report.success_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn selector_serializes_with_kind_tag() {
        let json = serde_json::to_value(CardSelector::Missing { limit: Some(5) }).unwrap();
        assert_eq!(json["kind"], "missing");
        assert_eq!(json["limit"], 5);
    }
}
