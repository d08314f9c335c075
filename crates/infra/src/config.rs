use std::time::Duration;

use journey_domain::runtime::model::RuntimeSettings;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub catalog_path: String,
    pub session_ttl_secs: u64,
    pub session_sweep_interval_ms: u64,
    pub refresh_on_startup: bool,
    pub validate_payload_on_submit: bool,
    pub request_timeout_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("catalog_path", "config/catalog.json")?
            .set_default("session_ttl_secs", 1800)?
            .set_default("session_sweep_interval_ms", 60000)?
            .set_default("refresh_on_startup", true)?
            .set_default("validate_payload_on_submit", false)?
            .set_default("request_timeout_ms", 30000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            validate_payload_on_submit: self.validate_payload_on_submit,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` disables the lapsed-session sweeper.
    pub fn session_sweep_interval(&self) -> Option<Duration> {
        (self.session_sweep_interval_ms > 0)
            .then(|| Duration::from_millis(self.session_sweep_interval_ms))
    }

    pub fn test_default() -> Self {
        Self {
            app_env: "test".to_string(),
            port: 0,
            log_level: "info".to_string(),
            data_backend: "memory".to_string(),
            catalog_path: "config/catalog.json".to_string(),
            session_ttl_secs: 1800,
            session_sweep_interval_ms: 0,
            refresh_on_startup: false,
            validate_payload_on_submit: false,
            request_timeout_ms: 30000,
        }
    }
}
