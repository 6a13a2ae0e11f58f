//! Persisted embedding of one concept

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec;
use crate::domain::DomainError;
use crate::domain::storage::StorageEntity;

/// The stored embedding for an entity under one embedding model.
/// The vector length is constant per model identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    entity_id: String,
    model: String,
    /// Encoded vector; packed binary preferred, legacy textual accepted
    vector: String,
    updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    /// Build a record from a freshly generated vector. Always writes the
    /// packed binary encoding, which is what upgrades legacy rows on
    /// their next write.
    pub fn new(entity_id: impl Into<String>, model: impl Into<String>, vector: &[f32]) -> Self {
        Self {
            entity_id: entity_id.into(),
            model: model.into(),
            vector: codec::encode(vector),
            updated_at: Utc::now(),
        }
    }

    /// Wrap an already-encoded value read from storage.
    pub fn from_encoded(
        entity_id: impl Into<String>,
        model: impl Into<String>,
        encoded: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            model: model.into(),
            vector: encoded.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_binary_encoded(&self) -> bool {
        codec::is_binary(&self.vector)
    }

    /// Decode the stored vector.
    pub fn vector(&self) -> Result<Vec<f32>, DomainError> {
        codec::decode(&self.vector)
    }
}

impl StorageEntity for EmbeddingRecord {
    type Key = String;

    fn key(&self) -> &Self::Key {
        &self.entity_id
    }
}
