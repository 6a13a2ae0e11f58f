use crate::domain::cache::CacheConfig;
use crate::domain::llm::{ProviderKind, RetryConfig};
use crate::domain::session::SessionConfig;

/// Application configuration
///
/// Populated from environment variables and in-code defaults; reading a
/// configuration file is the hosting application's concern.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Force a provider instead of inferring one from credentials
    pub provider: Option<ProviderKind>,
    /// Override the backend's default model
    pub model: Option<String>,
    /// Sampling temperature applied when a call does not set one
    pub temperature: Option<f32>,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Read overrides from `NOEMA_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("NOEMA_PROVIDER") {
            config.provider = value.parse().ok();
        }

        if let Ok(value) = std::env::var("NOEMA_MODEL") {
            if !value.trim().is_empty() {
                config.model = Some(value);
            }
        }

        if let Ok(value) = std::env::var("NOEMA_TEMPERATURE") {
            config.temperature = value.parse().ok();
        }

        if let Ok(value) = std::env::var("NOEMA_LOG_LEVEL") {
            config.logging.level = value;
        }

        if let Ok(value) = std::env::var("NOEMA_LOG_FORMAT") {
            if value.eq_ignore_ascii_case("json") {
                config.logging.format = LogFormat::Json;
            }
        }

        config
    }
}
