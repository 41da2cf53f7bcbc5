use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) telegram: TelegramSettings,
    pub(super) model: ModelSettings,
    pub(super) grading: GradingSettings,
    pub(super) storage: StorageSettings,
    pub(super) ops: OpsSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct TelegramSettings {
    pub(crate) token: String,
    pub(crate) api_base: String,
    pub(crate) poll_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct ModelSettings {
    pub(crate) model_id: String,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct GradingSettings {
    pub(crate) api_url: String,
    pub(crate) result_url: String,
    pub(crate) api_key: String,
    pub(crate) request_timeout_seconds: u64,
    pub(crate) poll_max_attempts: u32,
    pub(crate) poll_interval_seconds: u64,
    pub(crate) submit_retries: u32,
    pub(crate) notify_on_timeout: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct StorageSettings {
    pub(crate) root: PathBuf,
    pub(crate) ledger_path: PathBuf,
}

#[derive(Debug, Clone)]
pub(crate) struct OpsSettings {
    pub(crate) enabled: bool,
    pub(crate) host: String,
    pub(crate) port: u16,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Polling budget for a single grading task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) interval: Duration,
    pub(crate) notify_on_exhausted: bool,
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}
