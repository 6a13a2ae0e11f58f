use std::sync::Arc;

use tracing::info;

use super::http_client::HttpClient;
use super::{GeminiBackend, OpenAiBackend};
use crate::domain::DomainError;
use crate::domain::llm::{ModelBackend, ProviderKind};

/// Factory for creating model backends
#[derive(Debug)]
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend for a provider with an explicit API key.
    pub fn create(kind: ProviderKind, api_key: impl Into<String>) -> Arc<dyn ModelBackend> {
        match kind {
            ProviderKind::Gemini => Arc::new(GeminiBackend::new(HttpClient::new(), api_key)),
            ProviderKind::OpenAi => Arc::new(OpenAiBackend::new(HttpClient::new(), api_key)),
        }
    }

    /// Resolve the active backend from configured credentials.
    ///
    /// An explicit provider choice requires its credential to be set.
    /// Otherwise the first provider in preference order with a usable
    /// credential wins; no credential at all is a configuration error,
    /// surfaced immediately and never retried.
    pub fn resolve(explicit: Option<ProviderKind>) -> Result<Arc<dyn ModelBackend>, DomainError> {
        if let Some(kind) = explicit {
            let key = read_credential(kind).ok_or_else(|| {
                DomainError::configuration(format!(
                    "provider '{}' selected but {} is not set",
                    kind,
                    kind.credential_env_var()
                ))
            })?;

            info!(provider = %kind, "using explicitly configured provider");
            return Ok(Self::create(kind, key));
        }

        for kind in ProviderKind::preference_order() {
            if let Some(key) = read_credential(kind) {
                info!(provider = %kind, "provider inferred from configured credential");
                return Ok(Self::create(kind, key));
            }
        }

        Err(DomainError::configuration(
            "no model backend credential configured; set GEMINI_API_KEY or OPENAI_API_KEY",
        ))
    }
}

fn read_credential(kind: ProviderKind) -> Option<String> {
    std::env::var(kind.credential_env_var())
        .ok()
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_gemini() {
        let backend = BackendFactory::create(ProviderKind::Gemini, "test-key");
        assert_eq!(backend.provider(), ProviderKind::Gemini);
    }

    #[test]
    fn test_create_openai() {
        let backend = BackendFactory::create(ProviderKind::OpenAi, "test-key");
        assert_eq!(backend.provider(), ProviderKind::OpenAi);
    }
}
