use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::http_client::{HttpClientTrait, HttpError};
use crate::domain::llm::{
    CachedContextHandle, CompletionRequest, Message, MessageRole, ModelBackend, ProviderKind,
};
use crate::domain::DomainError;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const FALLBACK_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-1.5-flash", "gemini-1.5-pro"];

const EMBEDDING_MODELS: &[(&str, usize)] = &[("text-embedding-004", 768)];

/// Gemini backend. Supports provider-side context caching through the
/// cachedContents resource.
#[derive(Debug)]
pub struct GeminiBackend<C: HttpClientTrait> {
    client: C,
    api_key: String,
    base_url: String,
}

impl<C: HttpClientTrait> GeminiBackend<C> {
    pub fn new(client: C, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_GEMINI_BASE_URL)
    }

    pub fn with_base_url(
        client: C,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    fn embed_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:embedContent", self.base_url, model)
    }

    fn cached_contents_url(&self) -> String {
        format!("{}/v1beta/cachedContents", self.base_url)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("x-goog-api-key", self.api_key.as_str()),
            ("Content-Type", "application/json"),
        ]
    }

    fn build_request(&self, request: &CompletionRequest) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = request
            .conversation_messages()
            .iter()
            .map(|m| {
                json!({
                    "role": gemini_role(m),
                    "parts": [{"text": m.content()}],
                })
            })
            .collect();

        let mut body = json!({ "contents": contents });

        if let Some(system) = request.system_instruction() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let mut generation_config = serde_json::Map::new();

        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".into(), json!(temperature));
        }

        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
        }

        if request.json_output {
            generation_config.insert("responseMimeType".into(), json!("application/json"));
        }

        if !generation_config.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(generation_config);
        }

        if let Some(ref cached) = request.cached_context {
            body["cachedContent"] = json!(cached);
        }

        body
    }

    fn classify_error(&self, model: &str, error: HttpError) -> DomainError {
        if error.is_not_found() || error.message.contains("NOT_FOUND") {
            DomainError::model_unavailable("gemini", model, error.message)
        } else {
            DomainError::provider("gemini", error.message)
        }
    }

    fn parse_completion(&self, json: serde_json::Value) -> Result<String, DomainError> {
        let response: GenerateResponse = serde_json::from_value(json).map_err(|e| {
            DomainError::provider("gemini", format!("failed to parse response: {}", e))
        })?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::provider("gemini", "no candidates in response"))?;

        Ok(candidate
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

fn gemini_role(message: &Message) -> &'static str {
    match message.role {
        MessageRole::Assistant => "model",
        // System messages are lifted into systemInstruction before this
        MessageRole::System | MessageRole::User => "user",
    }
}

#[async_trait]
impl<C: HttpClientTrait> ModelBackend for GeminiBackend<C> {
    async fn complete(
        &self,
        model: &str,
        request: CompletionRequest,
    ) -> Result<String, DomainError> {
        let url = self.generate_url(model);
        let body = self.build_request(&request);

        let response = self
            .client
            .post_json(&url, self.headers(), &body)
            .await
            .map_err(|e| self.classify_error(model, e))?;

        self.parse_completion(response)
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, DomainError> {
        let url = self.embed_url(model);
        let body = json!({
            "model": format!("models/{}", model),
            "content": {"parts": [{"text": text}]},
        });

        let response = self
            .client
            .post_json(&url, self.headers(), &body)
            .await
            .map_err(|e| self.classify_error(model, e))?;

        let parsed: EmbedResponse = serde_json::from_value(response).map_err(|e| {
            DomainError::provider("gemini", format!("failed to parse embedding response: {}", e))
        })?;

        Ok(parsed.embedding.values)
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_model(&self) -> &'static str {
        FALLBACK_MODELS[0]
    }

    fn fallback_models(&self) -> Vec<&'static str> {
        FALLBACK_MODELS.to_vec()
    }

    fn default_embedding_model(&self) -> &'static str {
        "text-embedding-004"
    }

    fn embedding_dimensions(&self, model: &str) -> Option<usize> {
        EMBEDDING_MODELS
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, dims)| *dims)
    }

    fn supports_context_caching(&self) -> bool {
        true
    }

    async fn create_cached_context(
        &self,
        model: &str,
        content: &str,
        ttl: Duration,
    ) -> Result<CachedContextHandle, DomainError> {
        let url = self.cached_contents_url();
        let body = json!({
            "model": format!("models/{}", model),
            "contents": [{"role": "user", "parts": [{"text": content}]}],
            "ttl": format!("{}s", ttl.as_secs()),
        });

        let response = self
            .client
            .post_json(&url, self.headers(), &body)
            .await
            .map_err(|e| DomainError::cache(format!("cachedContents create failed: {}", e)))?;

        let parsed: CachedContentResponse = serde_json::from_value(response).map_err(|e| {
            DomainError::cache(format!("failed to parse cachedContents response: {}", e))
        })?;

        let expires_at = parsed
            .expire_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64));

        Ok(CachedContextHandle::new(parsed.name, expires_at))
    }

    async fn delete_cached_context(&self, handle: &str) -> Result<(), DomainError> {
        let url = format!("{}/v1beta/{}", self.base_url, handle);

        self.client
            .delete(&url, self.headers())
            .await
            .map_err(|e| DomainError::cache(format!("cachedContents delete failed: {}", e)))
    }
}

// Gemini API types

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedContentResponse {
    name: String,
    expire_time: Option<String>,
}
