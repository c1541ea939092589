mod app_config;
mod config;
pub mod schedules;
pub mod selector;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use schedules::{default_jobs, JobSpec};
pub use selector::{BatchRunReport, CardSelector, WithoutPricePolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
