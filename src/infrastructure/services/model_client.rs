//! Provider-agnostic model client
//!
//! Layers three policies over a single backend adapter: a fallback-model
//! cascade for "model not found" errors, bounded repair retries for
//! malformed structured output, and optional response/context caching.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::DomainError;
use crate::domain::cache::ResponseCache;
use crate::domain::llm::{
    CompletionRequest, Message, ModelBackend, ProviderKind, RetryConfig,
};
use crate::domain::session::ContextSessionManager;

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-call options for `complete` / `complete_json`
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub history: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Consult and populate the response cache (on by default)
    pub use_cache: bool,
    /// Reuse a context session's provider-side cache, if one is live
    pub session_key: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            system: None,
            history: Vec::new(),
            temperature: None,
            max_tokens: None,
            use_cache: true,
            session_key: None,
        }
    }
}

impl CompletionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }
}

/// Facade over one model backend
#[derive(Debug)]
pub struct ModelClient {
    backend: Arc<dyn ModelBackend>,
    cache: Option<Arc<ResponseCache>>,
    sessions: Option<Arc<ContextSessionManager>>,
    retry: RetryConfig,
    default_temperature: f32,
    /// Sticky: a fallback model that worked replaces the configured one
    /// for the rest of the process lifetime.
    current_model: RwLock<String>,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        let current_model = RwLock::new(backend.default_model().to_string());

        Self {
            backend,
            cache: None,
            sessions: None,
            retry: RetryConfig::default(),
            default_temperature: DEFAULT_TEMPERATURE,
            current_model,
        }
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        *self.current_model.write().unwrap() = model.into();
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<ContextSessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.backend.provider()
    }

    /// The model the next call will try first.
    pub fn current_model(&self) -> String {
        self.current_model.read().unwrap().clone()
    }

    pub fn embedding_model(&self) -> &'static str {
        self.backend.default_embedding_model()
    }

    pub fn embedding_dimensions(&self) -> Option<usize> {
        self.backend
            .embedding_dimensions(self.backend.default_embedding_model())
    }

    /// Embed text with the backend's embedding model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        self.backend
            .embed(self.backend.default_embedding_model(), text)
            .await
    }

    /// Text completion with caching and the fallback cascade.
    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, DomainError> {
        let cache_key = build_cache_key(options.system.as_deref(), prompt);

        if options.use_cache {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(&cache_key, &self.current_model()).await {
                    return Ok(hit);
                }
            }
        }

        let request = self.build_request(prompt, options, false).await;
        let (model, text) = self.run_cascade(&request).await?;
        self.make_sticky(&model);

        if options.use_cache {
            if let Some(cache) = &self.cache {
                cache.store(&cache_key, &text, &model).await;
            }
        }

        Ok(text)
    }

    /// Structured completion: returns a JSON object, repairing malformed
    /// output with up to `retry.max_attempts` tries per model before
    /// advancing the cascade.
    pub async fn complete_json(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Value, DomainError> {
        let cache_key = build_cache_key(options.system.as_deref(), prompt);

        if options.use_cache {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(&cache_key, &self.current_model()).await {
                    match parse_json_object(&hit) {
                        Ok(value) => return Ok(value),
                        Err(e) => warn!(error = %e, "cached response no longer parses; ignoring"),
                    }
                }
            }
        }

        let request = self.build_request(prompt, options, true).await;
        let mut last_error: Option<DomainError> = None;

        for model in self.candidate_models() {
            let mut attempt = 0u32;

            loop {
                attempt += 1;

                let text = match self.backend.complete(&model, request.clone()).await {
                    Ok(text) => text,
                    Err(e) if e.is_model_unavailable() => {
                        warn!(model = model.as_str(), error = %e, "model unavailable; trying next fallback");
                        last_error = Some(e);
                        break;
                    }
                    Err(e) => return Err(e),
                };

                match parse_json_object(&text) {
                    Ok(value) => {
                        self.make_sticky(&model);

                        if options.use_cache {
                            if let Some(cache) = &self.cache {
                                cache.store(&cache_key, &text, &model).await;
                            }
                        }

                        return Ok(value);
                    }
                    Err(parse_error) => {
                        warn!(
                            model = model.as_str(),
                            attempt,
                            error = %parse_error,
                            "structured output failed to parse"
                        );
                        last_error = Some(parse_error);

                        if attempt >= self.retry.max_attempts {
                            break;
                        }

                        tokio::time::sleep(self.retry.delay_after_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(DomainError::fallback_exhausted(last_error.unwrap_or_else(
            || DomainError::internal("no candidate models configured"),
        )))
    }

    /// One pass over the candidate models: "model not found" advances to
    /// the next candidate, any other error class re-raises immediately.
    async fn run_cascade(
        &self,
        request: &CompletionRequest,
    ) -> Result<(String, String), DomainError> {
        let mut last_error: Option<DomainError> = None;

        for model in self.candidate_models() {
            match self.backend.complete(&model, request.clone()).await {
                Ok(text) => return Ok((model, text)),
                Err(e) if e.is_model_unavailable() => {
                    warn!(model = model.as_str(), error = %e, "model unavailable; trying next fallback");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DomainError::fallback_exhausted(last_error.unwrap_or_else(
            || DomainError::internal("no candidate models configured"),
        )))
    }

    /// Current model first, then the backend's known-good list.
    fn candidate_models(&self) -> Vec<String> {
        let current = self.current_model();
        let mut models = vec![current.clone()];

        for model in self.backend.fallback_models() {
            if model != current {
                models.push(model.to_string());
            }
        }

        models
    }

    fn make_sticky(&self, model: &str) {
        let mut current = self.current_model.write().unwrap();

        if *current != model {
            info!(from = current.as_str(), to = model, "switching to working fallback model");
            *current = model.to_string();
        }
    }

    async fn build_request(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        json_output: bool,
    ) -> CompletionRequest {
        let mut builder = CompletionRequest::builder();

        if let Some(ref system) = options.system {
            builder = builder.system(system.clone());
        }

        builder = builder
            .messages(options.history.clone())
            .user(prompt)
            .temperature(options.temperature.unwrap_or(self.default_temperature))
            .json_output(json_output);

        if let Some(max_tokens) = options.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        if let Some(ref session_key) = options.session_key {
            if let Some(name) = self.lookup_cached_context(session_key).await {
                builder = builder.cached_context(name);
            }
        }

        builder.build()
    }

    async fn lookup_cached_context(&self, session_key: &str) -> Option<String> {
        if !self.backend.supports_context_caching() {
            return None;
        }

        let sessions = self.sessions.as_ref()?;

        match sessions.live_cached_context_name(session_key).await {
            Ok(Some(name)) => {
                debug!(session_key, "reusing provider-side cached context");
                Some(name)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(session_key, error = %e, "cached-context lookup failed; sending full prompt");
                None
            }
        }
    }
}

fn build_cache_key(system: Option<&str>, prompt: &str) -> String {
    match system {
        Some(system) => format!("{}\n{}", system, prompt),
        None => prompt.to_string(),
    }
}

/// Parse model output as a JSON object, tolerating markdown code fences.
/// A successfully-parsed non-object (a bare number, string, or array)
/// still counts as malformed.
fn parse_json_object(text: &str) -> Result<Value, DomainError> {
    let stripped = strip_code_fences(text);

    let value: Value = serde_json::from_str(stripped)
        .map_err(|e| DomainError::malformed_output(format!("invalid JSON: {}", e)))?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(DomainError::malformed_output(
            "parsed value is not a JSON object",
        ))
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);

    rest.trim()
}
