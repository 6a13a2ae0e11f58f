//! Semantic cache over prior completions
//!
//! Lookup is content-addressed: the prompt key is embedded and compared
//! by cosine similarity against stored fingerprints within the same
//! (provider, model) partition. Every failure on this path degrades to
//! a miss or a dropped store; the cache never fails a request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, warn};

use super::{CacheConfig, CachedResponse};
use crate::domain::DomainError;
use crate::domain::embedding::cosine_similarity;
use crate::domain::llm::ModelBackend;
use crate::domain::storage::Storage;

/// Hit/miss counters for introspection
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;

        if total == 0 {
            return 0.0;
        }

        self.hits as f32 / total as f32
    }
}

/// Content-addressed cache of completions
#[derive(Debug)]
pub struct ResponseCache {
    store: Arc<dyn Storage<CachedResponse>>,
    backend: Arc<dyn ModelBackend>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn Storage<CachedResponse>>, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            store,
            backend,
            config: CacheConfig::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up the closest prior response for a prompt key under the
    /// given model. Returns the payload on a sufficiently similar match.
    pub async fn get(&self, prompt_key: &str, model: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let fingerprint = match self.fingerprint(prompt_key).await {
            Some(v) => v,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let rows = match self.store.list().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "response cache read failed; treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let provider = self.backend.provider();
        let best = rows
            .into_iter()
            .filter(|row| row.matches_partition(provider, model))
            .map(|row| {
                let similarity = cosine_similarity(&fingerprint, row.fingerprint());
                (row, similarity)
            })
            .filter(|(_, similarity)| *similarity >= self.config.min_similarity)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((mut row, similarity)) => {
                debug!(similarity, model, "response cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);

                let response = row.response().to_string();
                row.touch();
                if let Err(e) = self.store.save(row).await {
                    warn!(error = %e, "failed to refresh cache row freshness");
                }

                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Persist a completion for future lookups. Never fails the caller.
    pub async fn store(&self, prompt_key: &str, response: &str, model: &str) {
        if !self.config.enabled {
            return;
        }

        let Some(fingerprint) = self.fingerprint(prompt_key).await else {
            return;
        };

        if let Err(e) = self.evict_if_full().await {
            warn!(error = %e, "response cache eviction failed");
        }

        let row = CachedResponse::new(
            fingerprint,
            prompt_key,
            response,
            self.backend.provider(),
            model,
        );

        if let Err(e) = self.store.save(row).await {
            warn!(error = %e, "failed to store cached response");
        }
    }

    /// Remove rows unused for longer than the configured TTL.
    pub async fn cleanup_expired(&self) -> Result<usize, DomainError> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.config.ttl_secs.min(i64::MAX as u64) as i64);
        let rows = self.store.list().await?;
        let mut removed = 0;

        for row in rows.into_iter().filter(|r| r.last_used_at() < cutoff) {
            if self.store.delete(&row.id().to_string()).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn size(&self) -> Result<usize, DomainError> {
        self.store.count().await
    }

    async fn fingerprint(&self, prompt_key: &str) -> Option<Vec<f32>> {
        let model = self.backend.default_embedding_model();

        match self.backend.embed(model, prompt_key).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "prompt fingerprinting failed; skipping cache");
                None
            }
        }
    }

    async fn evict_if_full(&self) -> Result<(), DomainError> {
        if self.store.count().await? < self.config.max_entries {
            return Ok(());
        }

        let rows = self.store.list().await?;

        if let Some(oldest) = rows.into_iter().min_by_key(|r| r.last_used_at()) {
            self.store.delete(&oldest.id().to_string()).await?;
        }

        Ok(())
    }
}
