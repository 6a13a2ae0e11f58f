//! In-memory nearest-neighbor index over concept embeddings
//!
//! Holds no source of truth: rebuilt from embedding records at startup
//! and patched incrementally as records change. Search is a linear scan
//! with precomputed entry norms.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::warn;

use crate::domain::DomainError;
use crate::domain::embedding::EmbeddingRecord;
use crate::domain::storage::Storage;

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entity_id: String,
    pub similarity: f32,
}

#[derive(Debug)]
struct IndexEntry {
    entity_id: String,
    vector: Vec<f32>,
    norm: f32,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Insertion order is preserved; it breaks similarity ties.
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

/// Entity id -> embedding map with top-k cosine search
#[derive(Debug, Default)]
pub struct VectorIndex {
    state: RwLock<IndexState>,
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from embedding storage. Records that fail to
    /// decode are skipped with a warning; returns the number loaded.
    pub async fn initialize(
        &self,
        store: &dyn Storage<EmbeddingRecord>,
    ) -> Result<usize, DomainError> {
        let records = store.list().await?;

        let mut state = self.write_state()?;
        state.entries.clear();
        state.positions.clear();

        let mut loaded = 0;

        for record in records {
            match record.vector() {
                Ok(vector) => {
                    upsert(&mut state, record.entity_id().to_string(), vector);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(
                        entity_id = record.entity_id(),
                        error = %e,
                        "skipping undecodable embedding record"
                    );
                }
            }
        }

        Ok(loaded)
    }

    /// Insert or replace the embedding for an id. Replacing keeps the
    /// entry's original insertion position.
    pub fn add_embedding(
        &self,
        entity_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<(), DomainError> {
        let mut state = self.write_state()?;
        upsert(&mut state, entity_id.into(), vector);
        Ok(())
    }

    /// Remove the embedding for an id; returns whether it was present.
    pub fn remove_embedding(&self, entity_id: &str) -> Result<bool, DomainError> {
        let mut guard = self.write_state()?;
        let state = &mut *guard;

        let Some(position) = state.positions.remove(entity_id) else {
            return Ok(false);
        };

        state.entries.remove(position);

        for (index, entry) in state.entries.iter().enumerate().skip(position) {
            state.positions.insert(entry.entity_id.clone(), index);
        }

        Ok(true)
    }

    /// Top-k entries by cosine similarity, descending, ties broken by
    /// insertion order. Entries below `min_similarity` and ids in
    /// `exclude` never appear. A zero-norm query or entry scores 0.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        exclude: &[String],
    ) -> Result<Vec<SearchHit>, DomainError> {
        let state = self.read_state()?;
        let query_norm = l2_norm(query);

        let mut hits: Vec<SearchHit> = state
            .entries
            .iter()
            .filter(|entry| !exclude.iter().any(|id| id == &entry.entity_id))
            .map(|entry| {
                let similarity = if query_norm == 0.0
                    || entry.norm == 0.0
                    || entry.vector.len() != query.len()
                {
                    0.0
                } else {
                    let dot: f32 = entry
                        .vector
                        .iter()
                        .zip(query.iter())
                        .map(|(a, b)| a * b)
                        .sum();
                    dot / (entry.norm * query_norm)
                };

                SearchHit {
                    entity_id: entry.entity_id.clone(),
                    similarity,
                }
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        // sort_by is stable, so equal similarities keep insertion order
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// The stored vector for an id, if indexed.
    pub fn vector_of(&self, entity_id: &str) -> Result<Option<Vec<f32>>, DomainError> {
        let state = self.read_state()?;

        Ok(state
            .positions
            .get(entity_id)
            .map(|&position| state.entries[position].vector.clone()))
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<(), DomainError> {
        let mut state = self.write_state()?;
        state.entries.clear();
        state.positions.clear();
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, IndexState>, DomainError> {
        self.state
            .read()
            .map_err(|e| DomainError::internal(format!("vector index lock poisoned: {}", e)))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, IndexState>, DomainError> {
        self.state
            .write()
            .map_err(|e| DomainError::internal(format!("vector index lock poisoned: {}", e)))
    }
}

fn upsert(state: &mut IndexState, entity_id: String, vector: Vec<f32>) {
    let norm = l2_norm(&vector);

    match state.positions.get(&entity_id) {
        Some(&position) => {
            state.entries[position] = IndexEntry {
                entity_id,
                vector,
                norm,
            };
        }
        None => {
            state.positions.insert(entity_id.clone(), state.entries.len());
            state.entries.push(IndexEntry {
                entity_id,
                vector,
                norm,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::embedding::codec;
    use crate::infrastructure::storage::InMemoryStorage;

    fn index_with(entries: &[(&str, Vec<f32>)]) -> VectorIndex {
        let index = VectorIndex::new();
        for (id, vector) in entries {
            index.add_embedding(*id, vector.clone()).unwrap();
        }
        index
    }

    #[test]
    fn test_add_then_search_returns_self_first() {
        let index = index_with(&[
            ("a", vec![1.0, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0]),
            ("c", vec![0.7, 0.7, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0, 0.0], 3, 0.0, &[]).unwrap();

        assert_eq!(hits[0].entity_id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_search_ordered_descending() {
        let index = index_with(&[
            ("low", vec![0.2, 0.9, 0.0]),
            ("high", vec![0.99, 0.1, 0.0]),
            ("medium", vec![0.7, 0.5, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0, 0.0], 3, 0.0, &[]).unwrap();

        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert_eq!(hits[0].entity_id, "high");
    }

    #[test]
    fn test_min_similarity_filters() {
        let index = index_with(&[
            ("close", vec![0.95, 0.1, 0.0]),
            ("far", vec![0.0, 1.0, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0, 0.0], 10, 0.5, &[]).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "close");
    }

    #[test]
    fn test_exclude_ids_never_returned() {
        let index = index_with(&[("a", vec![1.0, 0.0]), ("b", vec![0.9, 0.1])]);

        let hits = index
            .search(&[1.0, 0.0], 10, 0.0, &["a".to_string()])
            .unwrap();

        assert!(hits.iter().all(|h| h.entity_id != "a"));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_remove_then_search_absent() {
        let index = index_with(&[("a", vec![1.0, 0.0]), ("b", vec![0.5, 0.5])]);

        assert!(index.remove_embedding("a").unwrap());
        assert!(!index.remove_embedding("a").unwrap());

        let hits = index.search(&[1.0, 0.0], 10, 0.0, &[]).unwrap();
        assert!(hits.iter().all(|h| h.entity_id != "a"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_zero_norm_scores_zero_not_error() {
        let index = index_with(&[("zero", vec![0.0, 0.0]), ("unit", vec![1.0, 0.0])]);

        let hits = index.search(&[1.0, 0.0], 10, -1.0, &[]).unwrap();
        let zero_hit = hits.iter().find(|h| h.entity_id == "zero").unwrap();

        assert_eq!(zero_hit.similarity, 0.0);
    }

    #[test]
    fn test_upsert_replaces_vector() {
        let index = index_with(&[("a", vec![1.0, 0.0])]);
        index.add_embedding("a", vec![0.0, 1.0]).unwrap();

        assert_eq!(index.len(), 1);

        let hits = index.search(&[0.0, 1.0], 1, 0.9, &[]).unwrap();
        assert_eq!(hits[0].entity_id, "a");
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let index = index_with(&[
            ("second", vec![1.0, 0.0]),
            ("third", vec![1.0, 0.0]),
        ]);
        // Re-adding keeps the original position
        index.add_embedding("second", vec![1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 10, 0.0, &[]).unwrap();

        assert_eq!(hits[0].entity_id, "second");
        assert_eq!(hits[1].entity_id, "third");
    }

    #[tokio::test]
    async fn test_initialize_loads_both_encodings() {
        let store: InMemoryStorage<EmbeddingRecord> = InMemoryStorage::new();

        store
            .create(EmbeddingRecord::new("binary", "m", &[1.0, 0.0]))
            .await
            .unwrap();
        store
            .create(EmbeddingRecord::from_encoded("legacy", "m", "0.0,1.0"))
            .await
            .unwrap();
        store
            .create(EmbeddingRecord::from_encoded("broken", "m", "not numbers"))
            .await
            .unwrap();

        let index = VectorIndex::new();
        let loaded = index.initialize(&store).await.unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(index.len(), 2);
        assert!(index.vector_of("legacy").unwrap().is_some());
        assert!(index.vector_of("broken").unwrap().is_none());

        // Sanity: binary encoding survives the trip intact
        assert!(codec::is_binary(&codec::encode(&[1.0, 0.0])));
    }

    #[test]
    fn test_clear() {
        let index = index_with(&[("a", vec![1.0]), ("b", vec![0.5])]);

        index.clear().unwrap();

        assert!(index.is_empty());
        assert!(index.vector_of("a").unwrap().is_none());
    }
}
