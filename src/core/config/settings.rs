use std::time::Duration;

use super::parsing::{
    env_flag, env_optional, env_or_default, env_path, parse_bool, parse_environment,
    parse_nonzero_u32, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    ConfigError, GradingSettings, ModelSettings, OpsSettings, PollPolicy, RuntimeSettings,
    Settings, StorageSettings, TelegramSettings, TelemetrySettings,
};

const DEFAULT_MODEL_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("BOT_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("BOT_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let token = env_or_default("BOT_TOKEN", "");
        let api_base = env_or_default("TELEGRAM_API_BASE", "https://api.telegram.org");
        let poll_timeout_seconds = parse_u64(
            "TELEGRAM_POLL_TIMEOUT_SECONDS",
            env_or_default("TELEGRAM_POLL_TIMEOUT_SECONDS", "30"),
        )?;

        let model_id = env_or_default("MODEL_ID", "gemini-1.5-pro");
        let model_api_key = env_or_default("MODEL_API_KEY", "");
        let model_base_url = env_or_default("MODEL_BASE_URL", DEFAULT_MODEL_BASE_URL);
        let model_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "120"))?;

        let grading_api_url = env_or_default("GRADING_API_URL", "");
        let grading_result_url = env_or_default("GRADING_RESULT_URL", "");
        let grading_api_key = env_or_default("GRADING_API_KEY", "");
        let grading_timeout =
            parse_u64("GRADING_REQUEST_TIMEOUT", env_or_default("GRADING_REQUEST_TIMEOUT", "30"))?;
        let poll_max_attempts = parse_nonzero_u32(
            "GRADING_POLL_MAX_ATTEMPTS",
            env_or_default("GRADING_POLL_MAX_ATTEMPTS", "150"),
        )?;
        let poll_interval_seconds = parse_u64(
            "GRADING_POLL_INTERVAL_SECONDS",
            env_or_default("GRADING_POLL_INTERVAL_SECONDS", "5"),
        )?;
        let submit_retries =
            parse_u32("GRADING_SUBMIT_RETRIES", env_or_default("GRADING_SUBMIT_RETRIES", "2"))?;
        let notify_on_timeout = env_flag("GRADING_NOTIFY_ON_TIMEOUT", false);

        let storage_root = env_path("STORAGE_PATH", "./temp_exams");
        let ledger_path = env_path("JSON_FILE", "grading_results.json");

        let ops_enabled = env_flag("OPS_ENABLED", true);
        let ops_host = env_or_default("OPS_HOST", "0.0.0.0");
        let ops_port = parse_u16("OPS_PORT", env_or_default("OPS_PORT", "8080"))?;

        let log_level = env_or_default("BOT_LOG_LEVEL", "info");
        let json = env_flag("BOT_LOG_JSON", false);
        let prometheus_enabled = env_flag("PROMETHEUS_ENABLED", false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            telegram: TelegramSettings { token, api_base, poll_timeout_seconds },
            model: ModelSettings {
                model_id,
                api_key: model_api_key,
                base_url: model_base_url,
                request_timeout_seconds: model_timeout,
            },
            grading: GradingSettings {
                api_url: grading_api_url,
                result_url: grading_result_url,
                api_key: grading_api_key,
                request_timeout_seconds: grading_timeout,
                poll_max_attempts,
                poll_interval_seconds,
                submit_retries,
                notify_on_timeout,
            },
            storage: StorageSettings { root: storage_root, ledger_path },
            ops: OpsSettings { enabled: ops_enabled, host: ops_host, port: ops_port },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn telegram(&self) -> &TelegramSettings {
        &self.telegram
    }

    pub(crate) fn model(&self) -> &ModelSettings {
        &self.model
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn ops(&self) -> &OpsSettings {
        &self.ops
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn ops_addr(&self) -> String {
        format!("{}:{}", self.ops.host, self.ops.port)
    }

    pub(crate) fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.grading.poll_max_attempts,
            interval: Duration::from_secs(self.grading.poll_interval_seconds),
            notify_on_exhausted: self.grading.notify_on_timeout,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ops.enabled && self.ops.port == 0 {
            return Err(ConfigError::InvalidValue { field: "OPS_PORT", value: String::from("0") });
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "STORAGE_PATH",
                value: String::from("<empty>"),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.telegram.token.is_empty() {
            return Err(ConfigError::MissingSecret("BOT_TOKEN"));
        }

        if self.model.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("MODEL_API_KEY"));
        }

        if self.grading.api_url.is_empty() || self.grading.result_url.is_empty() {
            return Err(ConfigError::MissingSecret("GRADING_API_URL/GRADING_RESULT_URL"));
        }

        if self.grading.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("GRADING_API_KEY"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Settings;
    use crate::core::config::ConfigError;
    use crate::test_support;

    #[tokio::test]
    async fn defaults_match_original_poll_budget() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::remove_var("GRADING_POLL_MAX_ATTEMPTS");
        std::env::remove_var("GRADING_POLL_INTERVAL_SECONDS");

        let settings = Settings::load().expect("settings");
        let policy = settings.poll_policy();

        assert_eq!(policy.max_attempts, 150);
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert!(!policy.notify_on_exhausted);
    }

    #[tokio::test]
    async fn zero_poll_attempts_is_rejected() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("GRADING_POLL_MAX_ATTEMPTS", "0");

        let result = Settings::load();
        std::env::remove_var("GRADING_POLL_MAX_ATTEMPTS");

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "GRADING_POLL_MAX_ATTEMPTS", .. })
        ));
    }

    #[tokio::test]
    async fn strict_mode_requires_bot_token() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("BOT_STRICT_CONFIG", "1");
        std::env::remove_var("BOT_TOKEN");

        let result = Settings::load();
        std::env::set_var("BOT_STRICT_CONFIG", "0");

        assert!(matches!(result, Err(ConfigError::MissingSecret("BOT_TOKEN"))));
    }
}
