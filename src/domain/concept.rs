//! The user-authored knowledge unit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::storage::StorageEntity;

/// A concept in the knowledge base. Authored by the user; everything the
/// orchestration core derives (embeddings, link proposals, generated
/// metadata) hangs off its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    id: String,
    title: String,
    body: String,
    #[serde(default)]
    tags: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl Concept {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            tags: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The text fed to the embedding model for this concept.
    pub fn embedding_input_text(&self) -> String {
        let mut text = self.title.clone();

        if !self.tags.is_empty() {
            text.push('\n');
            text.push_str(&self.tags.join(", "));
        }

        if !self.body.is_empty() {
            text.push('\n');
            text.push_str(&self.body);
        }

        text
    }
}

impl StorageEntity for Concept {
    type Key = String;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}
