use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, ProviderKind};
use crate::domain::DomainError;

/// Reference to a provider-side cached context, together with the expiry
/// the provider granted it. Owned by at most one context session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedContextHandle {
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedContextHandle {
    pub fn new(name: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// One model backend (Gemini, OpenAI, ...).
///
/// Implementations merge system/user/history messages into the backend's
/// wire shape, request JSON-constrained output when `json_output` is set,
/// and surface "model not found" conditions as
/// `DomainError::ModelUnavailable` so the client facade can cascade.
#[async_trait]
pub trait ModelBackend: Send + Sync + Debug {
    /// Run a completion and return the generated text.
    async fn complete(
        &self,
        model: &str,
        request: CompletionRequest,
    ) -> Result<String, DomainError>;

    /// Embed a text into a fixed-length vector.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, DomainError>;

    fn provider(&self) -> ProviderKind;

    /// The model used when the caller does not pick one.
    fn default_model(&self) -> &'static str;

    /// Known-good models tried, in order, when the configured model is
    /// unavailable.
    fn fallback_models(&self) -> Vec<&'static str>;

    fn default_embedding_model(&self) -> &'static str;

    /// Vector length produced by an embedding model, if known.
    fn embedding_dimensions(&self, model: &str) -> Option<usize>;

    /// Whether this backend can hold conversation prefixes server-side.
    fn supports_context_caching(&self) -> bool {
        false
    }

    /// Upload static content as a provider-side cached context.
    async fn create_cached_context(
        &self,
        model: &str,
        content: &str,
        ttl: Duration,
    ) -> Result<CachedContextHandle, DomainError> {
        let _ = (model, content, ttl);
        Err(DomainError::cache(format!(
            "provider '{}' does not support context caching",
            self.provider()
        )))
    }

    /// Delete a provider-side cached context.
    async fn delete_cached_context(&self, handle: &str) -> Result<(), DomainError> {
        let _ = handle;
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    enum MockOutcome {
        Text(String),
        Unavailable,
        Fail(String),
    }

    /// Scriptable backend double. Outcomes are consumed per model in
    /// order; the last outcome for a model repeats forever, so a single
    /// `with_unavailable` makes that model permanently unavailable.
    #[derive(Debug)]
    pub struct MockModelBackend {
        provider: ProviderKind,
        default_model: &'static str,
        fallback_models: Vec<&'static str>,
        outcomes: Mutex<HashMap<String, VecDeque<MockOutcome>>>,
        embeddings: Mutex<HashMap<String, Vec<f32>>>,
        embedding_dimensions: usize,
        embed_error: Option<String>,
        embed_errors_for: Mutex<Vec<String>>,
        supports_caching: bool,
        context_create_error: Option<String>,
        calls: Mutex<Vec<String>>,
        created_contexts: Mutex<Vec<String>>,
        deleted_contexts: Mutex<Vec<String>>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockModelBackend {
        pub fn new(provider: ProviderKind) -> Self {
            Self {
                provider,
                default_model: "mock-default",
                fallback_models: vec!["mock-default", "mock-fallback-1", "mock-fallback-2"],
                outcomes: Mutex::new(HashMap::new()),
                embeddings: Mutex::new(HashMap::new()),
                embedding_dimensions: 8,
                embed_error: None,
                embed_errors_for: Mutex::new(Vec::new()),
                supports_caching: false,
                context_create_error: None,
                calls: Mutex::new(Vec::new()),
                created_contexts: Mutex::new(Vec::new()),
                deleted_contexts: Mutex::new(Vec::new()),
                last_request: Mutex::new(None),
            }
        }

        pub fn with_models(
            mut self,
            default_model: &'static str,
            fallback_models: Vec<&'static str>,
        ) -> Self {
            self.default_model = default_model;
            self.fallback_models = fallback_models;
            self
        }

        fn push(self, model: &str, outcome: MockOutcome) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(outcome);
            self
        }

        pub fn with_response(self, model: &str, text: impl Into<String>) -> Self {
            self.push(model, MockOutcome::Text(text.into()))
        }

        pub fn with_unavailable(self, model: &str) -> Self {
            self.push(model, MockOutcome::Unavailable)
        }

        pub fn with_error(self, model: &str, message: impl Into<String>) -> Self {
            self.push(model, MockOutcome::Fail(message.into()))
        }

        pub fn with_embedding(self, text: &str, vector: Vec<f32>) -> Self {
            self.embeddings
                .lock()
                .unwrap()
                .insert(text.to_string(), vector);
            self
        }

        pub fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
            self.embedding_dimensions = dimensions;
            self
        }

        pub fn with_embed_error(mut self, message: impl Into<String>) -> Self {
            self.embed_error = Some(message.into());
            self
        }

        /// Fail embedding only for texts containing this fragment.
        pub fn with_embed_error_for(self, fragment: impl Into<String>) -> Self {
            self.embed_errors_for.lock().unwrap().push(fragment.into());
            self
        }

        pub fn with_context_caching(mut self, supported: bool) -> Self {
            self.supports_caching = supported;
            self
        }

        pub fn with_context_create_error(mut self, message: impl Into<String>) -> Self {
            self.context_create_error = Some(message.into());
            self
        }

        /// Models called, in order, one entry per completion attempt.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, model: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|m| *m == model).count()
        }

        pub fn created_contexts(&self) -> Vec<String> {
            self.created_contexts.lock().unwrap().clone()
        }

        pub fn deleted_contexts(&self) -> Vec<String> {
            self.deleted_contexts.lock().unwrap().clone()
        }

        pub fn last_request(&self) -> Option<CompletionRequest> {
            self.last_request.lock().unwrap().clone()
        }

        fn next_outcome(&self, model: &str) -> Option<MockOutcome> {
            let mut outcomes = self.outcomes.lock().unwrap();
            let queue = outcomes.get_mut(model)?;

            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }
    }

    #[async_trait]
    impl ModelBackend for MockModelBackend {
        async fn complete(
            &self,
            model: &str,
            request: CompletionRequest,
        ) -> Result<String, DomainError> {
            self.calls.lock().unwrap().push(model.to_string());
            *self.last_request.lock().unwrap() = Some(request);

            match self.next_outcome(model) {
                Some(MockOutcome::Text(text)) => Ok(text),
                Some(MockOutcome::Unavailable) => Err(DomainError::model_unavailable(
                    self.provider.as_str(),
                    model,
                    "model not found",
                )),
                Some(MockOutcome::Fail(message)) => {
                    Err(DomainError::provider(self.provider.as_str(), message))
                }
                None => Err(DomainError::provider(
                    self.provider.as_str(),
                    format!("no scripted outcome for model '{}'", model),
                )),
            }
        }

        async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, DomainError> {
            if let Some(ref message) = self.embed_error {
                return Err(DomainError::provider(self.provider.as_str(), message));
            }

            if self
                .embed_errors_for
                .lock()
                .unwrap()
                .iter()
                .any(|fragment| text.contains(fragment))
            {
                return Err(DomainError::provider(
                    self.provider.as_str(),
                    format!("embedding rejected for '{}'", text),
                ));
            }

            if let Some(vector) = self.embeddings.lock().unwrap().get(text) {
                return Ok(vector.clone());
            }

            // Deterministic per-text vector so unscripted embeds still work
            let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_add(b as u64));
            Ok((0..self.embedding_dimensions)
                .map(|i| ((hash.wrapping_add(i as u64) % 1000) as f32 / 1000.0) - 0.5)
                .collect())
        }

        fn provider(&self) -> ProviderKind {
            self.provider
        }

        fn default_model(&self) -> &'static str {
            self.default_model
        }

        fn fallback_models(&self) -> Vec<&'static str> {
            self.fallback_models.clone()
        }

        fn default_embedding_model(&self) -> &'static str {
            "mock-embedding"
        }

        fn embedding_dimensions(&self, _model: &str) -> Option<usize> {
            Some(self.embedding_dimensions)
        }

        fn supports_context_caching(&self) -> bool {
            self.supports_caching
        }

        async fn create_cached_context(
            &self,
            _model: &str,
            content: &str,
            ttl: Duration,
        ) -> Result<CachedContextHandle, DomainError> {
            if !self.supports_caching {
                return Err(DomainError::cache(format!(
                    "provider '{}' does not support context caching",
                    self.provider
                )));
            }

            if let Some(ref message) = self.context_create_error {
                return Err(DomainError::cache(message));
            }

            let name = format!("cached/{}", content.len());
            self.created_contexts.lock().unwrap().push(name.clone());

            Ok(CachedContextHandle::new(
                name,
                Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64),
            ))
        }

        async fn delete_cached_context(&self, handle: &str) -> Result<(), DomainError> {
            self.deleted_contexts.lock().unwrap().push(handle.to_string());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_scripted_outcomes_repeat_last() {
            let backend = MockModelBackend::new(ProviderKind::OpenAi)
                .with_unavailable("gone")
                .with_response("ok", "hello");

            let request = CompletionRequest::builder().user("hi").build();

            for _ in 0..3 {
                let err = backend.complete("gone", request.clone()).await.unwrap_err();
                assert!(err.is_model_unavailable());
            }

            assert_eq!(backend.complete("ok", request).await.unwrap(), "hello");
            assert_eq!(backend.call_count("gone"), 3);
        }

        #[tokio::test]
        async fn test_deterministic_embeddings() {
            let backend = MockModelBackend::new(ProviderKind::OpenAi);

            let a = backend.embed("mock-embedding", "same text").await.unwrap();
            let b = backend.embed("mock-embedding", "same text").await.unwrap();

            assert_eq!(a, b);
            assert_eq!(a.len(), 8);
        }

        #[tokio::test]
        async fn test_explicit_embedding_wins() {
            let backend = MockModelBackend::new(ProviderKind::OpenAi)
                .with_embedding("pinned", vec![1.0, 0.0]);

            let vector = backend.embed("mock-embedding", "pinned").await.unwrap();
            assert_eq!(vector, vec![1.0, 0.0]);
        }
    }
}
