//! Session lifecycle and the bridge to provider-side context caching

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::ContextSession;
use crate::domain::DomainError;
use crate::domain::llm::{CachedContextHandle, Message, ModelBackend};
use crate::domain::storage::Storage;

/// Tunables for session lifetime and provider-side caching
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// TTL applied when a caller does not pass one
    pub default_ttl_secs: u64,
    /// Static content below this size is never worth a provider cache
    pub min_context_cache_chars: usize,
    /// TTL requested for provider-side caches (capped by session expiry)
    pub context_cache_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            min_context_cache_chars: 24_000,
            context_cache_ttl_secs: 1800,
        }
    }
}

impl SessionConfig {
    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    pub fn with_min_context_cache_chars(mut self, chars: usize) -> Self {
        self.min_context_cache_chars = chars;
        self
    }

    pub fn with_context_cache_ttl(mut self, secs: u64) -> Self {
        self.context_cache_ttl_secs = secs;
        self
    }
}

/// Manages context sessions and their optional provider-side caches.
///
/// Provider-side caching is an optimization, never a correctness
/// requirement: every failure on that path is logged and swallowed.
#[derive(Debug)]
pub struct ContextSessionManager {
    store: Arc<dyn Storage<ContextSession>>,
    backend: Arc<dyn ModelBackend>,
    config: SessionConfig,
}

impl ContextSessionManager {
    pub fn new(store: Arc<dyn Storage<ContextSession>>, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            store,
            backend,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fetch-or-create the session for a key. Expired sessions are swept
    /// first, so reuse after expiry behaves exactly like a fresh create.
    pub async fn get_or_create(
        &self,
        session_key: &str,
        model: &str,
        initial_messages: Vec<Message>,
        entity_ids: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<ContextSession, DomainError> {
        self.sweep_expired().await?;

        let ttl = ttl.unwrap_or(Duration::from_secs(self.config.default_ttl_secs));

        match self.store.get(&session_key.to_string()).await? {
            Some(mut session) if !session.is_expired() => {
                session.merge(initial_messages, entity_ids, ttl);
                self.store.save(session.clone()).await?;
                Ok(session)
            }
            _ => {
                let session = ContextSession::new(
                    session_key,
                    self.backend.provider(),
                    model,
                    initial_messages,
                    entity_ids,
                    ttl,
                );
                self.store.save(session.clone()).await?;
                Ok(session)
            }
        }
    }

    /// Delete every expired session, tearing down any provider-side
    /// cache each one owns. Returns the number of sessions removed.
    pub async fn sweep_expired(&self) -> Result<usize, DomainError> {
        let sessions = self.store.list().await?;
        let mut swept = 0;

        for session in sessions.into_iter().filter(|s| s.is_expired()) {
            self.teardown_cached_context(&session).await;
            self.store.delete(&session.session_key().to_string()).await?;
            swept += 1;
        }

        if swept > 0 {
            debug!(swept, "swept expired context sessions");
        }

        Ok(swept)
    }

    /// Attach a provider-side cache holding `content` to the session, if
    /// it is worth it: capable provider, content above the size
    /// threshold, and no live handle already present. Provider failures
    /// degrade to `None`.
    pub async fn ensure_cached_context(
        &self,
        session_key: &str,
        content: &str,
    ) -> Result<Option<CachedContextHandle>, DomainError> {
        let mut session = self
            .store
            .get(&session_key.to_string())
            .await?
            .filter(|s| !s.is_expired())
            .ok_or_else(|| {
                DomainError::not_found(format!("context session '{}' not found", session_key))
            })?;

        if content.len() < self.config.min_context_cache_chars {
            return Ok(None);
        }

        if !self.backend.supports_context_caching() {
            return Ok(None);
        }

        if let Some(handle) = session.live_cached_context() {
            return Ok(Some(handle.clone()));
        }

        let until_session_expiry = (session.expires_at() - chrono::Utc::now())
            .num_seconds()
            .max(0) as u64;
        let ttl = Duration::from_secs(self.config.context_cache_ttl_secs.min(until_session_expiry));

        match self
            .backend
            .create_cached_context(session.model(), content, ttl)
            .await
        {
            Ok(handle) => {
                session.set_cached_context(Some(handle.clone()));
                self.store.save(session).await?;
                Ok(Some(handle))
            }
            Err(e) => {
                warn!(session_key, error = %e, "context cache creation failed; continuing without");
                Ok(None)
            }
        }
    }

    /// Unexpired cached-context handle name for a session, if any.
    pub async fn live_cached_context_name(
        &self,
        session_key: &str,
    ) -> Result<Option<String>, DomainError> {
        Ok(self
            .store
            .get(&session_key.to_string())
            .await?
            .filter(|s| !s.is_expired())
            .and_then(|s| s.live_cached_context().map(|h| h.name.clone())))
    }

    /// Delete a session, external cache first.
    pub async fn delete_session(&self, session_key: &str) -> Result<bool, DomainError> {
        if let Some(session) = self.store.get(&session_key.to_string()).await? {
            self.teardown_cached_context(&session).await;
        }

        self.store.delete(&session_key.to_string()).await
    }

    /// Delete every session referencing any of the given entity ids.
    /// Used when an entity's content changes, so no stale context is
    /// ever replayed. Returns the number of sessions invalidated.
    pub async fn invalidate_for_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<usize, DomainError> {
        let sessions = self.store.list().await?;
        let mut invalidated = 0;

        for session in sessions
            .into_iter()
            .filter(|s| s.references_any(entity_ids))
        {
            self.teardown_cached_context(&session).await;
            self.store.delete(&session.session_key().to_string()).await?;
            invalidated += 1;
        }

        Ok(invalidated)
    }

    async fn teardown_cached_context(&self, session: &ContextSession) {
        if let Some(handle) = session.cached_context() {
            if let Err(e) = self.backend.delete_cached_context(&handle.name).await {
                warn!(
                    session_key = session.session_key(),
                    handle = handle.name.as_str(),
                    error = %e,
                    "failed to delete provider-side context cache"
                );
            }
        }
    }
}
