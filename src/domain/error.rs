use thiserror::Error;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    #[error("Model '{model}' unavailable on {provider}: {message}")]
    ModelUnavailable {
        provider: String,
        model: String,
        message: String,
    },

    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String },

    #[error("Fallback models exhausted: {source}")]
    FallbackExhausted {
        #[source]
        source: Box<DomainError>,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn model_unavailable(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ModelUnavailable {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn malformed_output(message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
        }
    }

    pub fn fallback_exhausted(source: DomainError) -> Self {
        Self::FallbackExhausted {
            source: Box::new(source),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this is the "model not found" class that drives the
    /// fallback-model cascade.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Self::ModelUnavailable { .. })
    }

    /// Whether this is a structured-output parse failure.
    pub fn is_malformed_output(&self) -> bool {
        matches!(self, Self::MalformedOutput { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let error = DomainError::configuration("no usable credential");
        assert_eq!(
            error.to_string(),
            "Configuration error: no usable credential"
        );
    }

    #[test]
    fn test_model_unavailable_classification() {
        let error = DomainError::model_unavailable("openai", "gpt-x", "no such model");
        assert!(error.is_model_unavailable());
        assert!(!error.is_malformed_output());
    }

    #[test]
    fn test_fallback_exhausted_references_last_error() {
        let last = DomainError::malformed_output("expected a JSON object");
        let error = DomainError::fallback_exhausted(last);

        assert!(error.to_string().contains("expected a JSON object"));
    }
}
