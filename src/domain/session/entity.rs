//! Multi-turn conversation state keyed by a logical session key

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::llm::{CachedContextHandle, Message, ProviderKind};
use crate::domain::storage::StorageEntity;

/// A reusable conversation context. Created on first use per key, merged
/// (never replaced) on reuse within its TTL, and swept once expired.
/// Owns at most one provider-side cached context; the handle is torn
/// down before the session row is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSession {
    session_key: String,
    provider: ProviderKind,
    model: String,
    messages: Vec<Message>,
    entity_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached_context: Option<CachedContextHandle>,
    expires_at: DateTime<Utc>,
}

fn expiry_from(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)
}

impl ContextSession {
    pub fn new(
        session_key: impl Into<String>,
        provider: ProviderKind,
        model: impl Into<String>,
        messages: Vec<Message>,
        entity_ids: Vec<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            provider,
            model: model.into(),
            messages,
            entity_ids,
            cached_context: None,
            expires_at: expiry_from(ttl),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    pub fn cached_context(&self) -> Option<&CachedContextHandle> {
        self.cached_context.as_ref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Fold another turn into the session: append messages, union entity
    /// ids, push the expiry out. The cached-context handle is preserved.
    pub fn merge(&mut self, messages: Vec<Message>, entity_ids: Vec<String>, ttl: Duration) {
        self.messages.extend(messages);

        for id in entity_ids {
            if !self.entity_ids.contains(&id) {
                self.entity_ids.push(id);
            }
        }

        self.expires_at = expiry_from(ttl);
    }

    pub fn set_cached_context(&mut self, handle: Option<CachedContextHandle>) {
        self.cached_context = handle;
    }

    /// Unexpired cached-context handle, if the session holds one.
    pub fn live_cached_context(&self) -> Option<&CachedContextHandle> {
        self.cached_context.as_ref().filter(|h| !h.is_expired())
    }

    pub fn references_any(&self, entity_ids: &[String]) -> bool {
        self.entity_ids.iter().any(|id| entity_ids.contains(id))
    }
}

impl StorageEntity for ContextSession {
    type Key = String;

    fn key(&self) -> &Self::Key {
        &self.session_key
    }
}
