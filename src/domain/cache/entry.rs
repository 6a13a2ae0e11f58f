//! Persisted cached completion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::llm::ProviderKind;
use crate::domain::storage::StorageEntity;

/// One cached completion, looked up by fingerprint similarity within its
/// (provider, model) partition. The prompt text is kept for diagnostics
/// only; matching never compares strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    id: String,
    fingerprint: Vec<f32>,
    prompt_text: String,
    response: String,
    provider: ProviderKind,
    model: String,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(
        fingerprint: Vec<f32>,
        prompt_text: impl Into<String>,
        response: impl Into<String>,
        provider: ProviderKind,
        model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            fingerprint,
            prompt_text: prompt_text.into(),
            response: response.into(),
            provider,
            model: model.into(),
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fingerprint(&self) -> &[f32] {
        &self.fingerprint
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    /// Refresh the freshness timestamp; called on every hit.
    pub fn touch(&mut self) {
        self.last_used_at = Utc::now();
    }

    pub fn matches_partition(&self, provider: ProviderKind, model: &str) -> bool {
        self.provider == provider && self.model == model
    }
}

impl StorageEntity for CachedResponse {
    type Key = String;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}
