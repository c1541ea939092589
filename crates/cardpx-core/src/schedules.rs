//! Default recurring sync jobs.
//!
//! Cron expressions use the 6-field `sec min hour day month weekday` form
//! accepted by `tokio-cron-scheduler`.

use crate::{AppConfig, CardSelector};

pub const UPDATE_HOT_PRICES: &str = "UPDATE_HOT_PRICES";
pub const UPDATE_STALE_PRICES: &str = "UPDATE_STALE_PRICES";
pub const SYNC_MISSING_PRICES: &str = "SYNC_MISSING_PRICES";
pub const RETRY_WITHOUT_PRICE: &str = "RETRY_WITHOUT_PRICE";

/// A named recurring batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub schedule: String,
    pub selector: CardSelector,
    pub enabled: bool,
    pub throttle_ms: u64,
}

/// Builds the job table from configuration.
///
/// Jobs named in `disabled_jobs` are kept in the table but marked disabled so
/// they still show up in scheduler status.
#[must_use]
pub fn default_jobs(config: &AppConfig) -> Vec<JobSpec> {
    let enabled = |name: &str| !config.disabled_jobs.iter().any(|d| d == name);

    vec![
        JobSpec {
            name: UPDATE_HOT_PRICES.to_string(),
            schedule: config.hot_prices_cron.clone(),
            selector: CardSelector::Hot {
                min_updates: config.hot_min_updates,
                window_days: config.hot_window_days,
                limit: config.hot_batch_limit,
            },
            enabled: enabled(UPDATE_HOT_PRICES),
            throttle_ms: config.sync_throttle_ms,
        },
        JobSpec {
            name: UPDATE_STALE_PRICES.to_string(),
            schedule: config.stale_prices_cron.clone(),
            selector: CardSelector::Stale {
                max_age_hours: config.stale_max_age_hours,
                limit: config.stale_batch_limit,
            },
            enabled: enabled(UPDATE_STALE_PRICES),
            throttle_ms: config.sync_throttle_ms,
        },
        JobSpec {
            name: SYNC_MISSING_PRICES.to_string(),
            schedule: config.missing_prices_cron.clone(),
            selector: CardSelector::Missing { limit: None },
            enabled: enabled(SYNC_MISSING_PRICES),
            throttle_ms: config.sync_throttle_ms,
        },
        JobSpec {
            name: RETRY_WITHOUT_PRICE.to_string(),
            schedule: config.retry_without_price_cron.clone(),
            selector: CardSelector::Retry {
                older_than_days: config.without_price_cooldown_days,
                limit: config.retry_batch_limit,
            },
            enabled: enabled(RETRY_WITHOUT_PRICE),
            throttle_ms: config.retry_throttle_ms,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> AppConfig {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://localhost/cards"),
            ("CARDPX_DISABLED_JOBS", "retry_without_price"),
        ]);
        crate::build_app_config(|key| {
            env.get(key)
                .map(|v| (*v).to_string())
                .ok_or(std::env::VarError::NotPresent)
        })
        .expect("test config should parse")
    }

    #[test]
    fn default_jobs_has_four_unique_names() {
        let jobs = default_jobs(&config());
        let mut names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn disabled_jobs_are_kept_but_marked() {
        let jobs = default_jobs(&config());
        let retry = jobs
            .iter()
            .find(|j| j.name == RETRY_WITHOUT_PRICE)
            .expect("retry job present");
        assert!(!retry.enabled);
        assert_eq!(retry.throttle_ms, 2000);
        assert!(matches!(
            retry.selector,
            CardSelector::Retry {
                older_than_days: 30,
                limit: 50
            }
        ));
    }

    #[test]
    fn hot_job_uses_configured_thresholds() {
        let jobs = default_jobs(&config());
        let hot = jobs.iter().find(|j| j.name == UPDATE_HOT_PRICES).unwrap();
        assert!(hot.enabled);
        assert_eq!(
            hot.selector,
            CardSelector::Hot {
                min_updates: 10,
                window_days: 7,
                limit: 50
            }
        );
    }
}
