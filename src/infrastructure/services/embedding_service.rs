//! Background reconciliation between concepts and their embeddings
//!
//! A run scans for concepts without a current embedding, processes them
//! in batches, and mirrors every generated vector into the index.
//! Per-concept failures are logged and skipped; a batch whose every
//! concept failed is retried with backoff, then counted failed, and the
//! run moves on. The iteration ceiling and the no-progress check bound
//! the run's duration regardless of backend flakiness.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ModelClient;
use crate::domain::DomainError;
use crate::domain::concept::Concept;
use crate::domain::embedding::EmbeddingRecord;
use crate::domain::llm::RetryConfig;
use crate::domain::storage::Storage;
use crate::domain::vector::VectorIndex;

/// Extra iterations allowed beyond ceil(missing / batch_size)
const ITERATION_SAFETY_MARGIN: usize = 2;

/// Snapshot reported after every batch
#[derive(Debug, Clone)]
pub struct ReconcileProgress {
    pub processed: usize,
    pub succeeded_batches: usize,
    pub failed_batches: usize,
    pub remaining: usize,
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub iterations: usize,
    pub processed: usize,
    pub succeeded_batches: usize,
    pub failed_batches: usize,
    pub remaining: usize,
}

/// Embedding coverage of the knowledge base
#[derive(Debug, Clone)]
pub struct EmbeddingStatus {
    pub total: usize,
    pub with_embedding: usize,
    pub without_embedding: usize,
    pub embedding_model: String,
}

pub type ProgressCallback = dyn Fn(&ReconcileProgress) + Send + Sync;

/// Keeps embeddings consistent with the evolving knowledge base
#[derive(Debug)]
pub struct EmbeddingService {
    concepts: Arc<dyn Storage<Concept>>,
    records: Arc<dyn Storage<EmbeddingRecord>>,
    index: Arc<VectorIndex>,
    client: Arc<ModelClient>,
    retry: RetryConfig,
}

impl EmbeddingService {
    pub fn new(
        concepts: Arc<dyn Storage<Concept>>,
        records: Arc<dyn Storage<EmbeddingRecord>>,
        index: Arc<VectorIndex>,
        client: Arc<ModelClient>,
    ) -> Self {
        Self {
            concepts,
            records,
            index,
            client,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Embed one concept right now: storage and index are updated before
    /// this returns. Used directly after a concept is created or edited.
    pub async fn embed_for_concept(&self, concept_id: &str) -> Result<(), DomainError> {
        let concept = self
            .concepts
            .get(&concept_id.to_string())
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("concept '{}' not found", concept_id))
            })?;

        self.embed_concept(&concept).await
    }

    /// Drop a deleted concept's embedding from storage and the index.
    pub async fn remove_for_concept(&self, concept_id: &str) -> Result<(), DomainError> {
        self.records.delete(&concept_id.to_string()).await?;
        self.index.remove_embedding(concept_id)?;
        Ok(())
    }

    /// One reconciliation run. Processes up to `batch_size` missing
    /// concepts per iteration and reports progress after every batch.
    pub async fn reconcile_missing(
        &self,
        batch_size: usize,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<ReconcileReport, DomainError> {
        let batch_size = batch_size.max(1);
        let initial_missing = self.missing_concepts().await?.len();
        let mut report = ReconcileReport {
            remaining: initial_missing,
            ..Default::default()
        };

        if initial_missing == 0 {
            debug!("no concepts missing embeddings");
            return Ok(report);
        }

        info!(missing = initial_missing, batch_size, "starting embedding reconciliation");

        let ceiling = initial_missing.div_ceil(batch_size) + ITERATION_SAFETY_MARGIN;
        let mut any_batch_succeeded = false;
        let mut previous_remaining = initial_missing;

        while report.iterations < ceiling {
            let missing = self.missing_concepts().await?;

            if missing.is_empty() {
                break;
            }

            let batch: Vec<Concept> = missing.into_iter().take(batch_size).collect();
            report.iterations += 1;

            match self.process_batch_with_retry(&batch).await {
                Some(count) => {
                    any_batch_succeeded = true;
                    report.succeeded_batches += 1;
                    report.processed += count;
                }
                None => report.failed_batches += 1,
            }

            let remaining = self.missing_concepts().await?.len();
            report.remaining = remaining;

            if let Some(callback) = on_progress {
                callback(&ReconcileProgress {
                    processed: report.processed,
                    succeeded_batches: report.succeeded_batches,
                    failed_batches: report.failed_batches,
                    remaining,
                });
            }

            if remaining == 0 {
                break;
            }

            if !any_batch_succeeded && remaining == previous_remaining {
                warn!(remaining, "reconciliation making no progress; stopping run");
                break;
            }

            previous_remaining = remaining;
        }

        info!(
            iterations = report.iterations,
            processed = report.processed,
            failed_batches = report.failed_batches,
            remaining = report.remaining,
            "embedding reconciliation finished"
        );

        Ok(report)
    }

    /// Embedding coverage under the active embedding model.
    pub async fn status(&self) -> Result<EmbeddingStatus, DomainError> {
        let total = self.concepts.count().await?;
        let without_embedding = self.missing_concepts().await?.len();

        Ok(EmbeddingStatus {
            total,
            with_embedding: total - without_embedding,
            without_embedding,
            embedding_model: self.client.embedding_model().to_string(),
        })
    }

    /// Concepts without a record from the active embedding model, in a
    /// stable id order.
    async fn missing_concepts(&self) -> Result<Vec<Concept>, DomainError> {
        let model = self.client.embedding_model();

        let embedded: HashSet<String> = self
            .records
            .list()
            .await?
            .into_iter()
            .filter(|r| r.model() == model)
            .map(|r| r.entity_id().to_string())
            .collect();

        let mut missing: Vec<Concept> = self
            .concepts
            .list()
            .await?
            .into_iter()
            .filter(|c| !embedded.contains(c.id()))
            .collect();

        missing.sort_by(|a, b| a.id().cmp(b.id()));

        Ok(missing)
    }

    /// Bounded-retry state machine around one batch: attempt counter up
    /// to the configured budget, delay doubling between attempts.
    async fn process_batch_with_retry(&self, batch: &[Concept]) -> Option<usize> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.process_batch(batch).await {
                Ok(count) => return Some(count),
                Err(e) => {
                    warn!(attempt, error = %e, "embedding batch attempt failed");

                    if attempt >= self.retry.max_attempts {
                        return None;
                    }

                    tokio::time::sleep(self.retry.delay_after_attempt(attempt)).await;
                }
            }
        }
    }

    /// Embed every concept in the batch. Individual failures are logged
    /// and skipped; the attempt as a whole fails only when nothing in
    /// the batch could be embedded.
    async fn process_batch(&self, batch: &[Concept]) -> Result<usize, DomainError> {
        let mut succeeded = 0;
        let mut last_error = None;

        for concept in batch {
            match self.embed_concept(concept).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    warn!(concept_id = concept.id(), error = %e, "embedding failed; skipping concept");
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            Err(last_error.unwrap_or_else(|| DomainError::internal("empty embedding batch")))
        } else {
            Ok(succeeded)
        }
    }

    async fn embed_concept(&self, concept: &Concept) -> Result<(), DomainError> {
        let text = concept.embedding_input_text();
        let vector = self.client.embed(&text).await?;

        if let Some(dimensions) = self.client.embedding_dimensions() {
            if vector.len() != dimensions {
                return Err(DomainError::provider(
                    self.client.provider().as_str(),
                    format!(
                        "embedding length {} does not match model dimensions {}",
                        vector.len(),
                        dimensions
                    ),
                ));
            }
        }

        let record = EmbeddingRecord::new(concept.id(), self.client.embedding_model(), &vector);
        self.records.save(record).await?;
        self.index.add_embedding(concept.id(), vector)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::llm::ProviderKind;
    use crate::domain::llm::mock::MockModelBackend;
    use crate::infrastructure::storage::InMemoryStorage;

    struct Fixture {
        records: Arc<InMemoryStorage<EmbeddingRecord>>,
        index: Arc<VectorIndex>,
        service: EmbeddingService,
    }

    fn fixture(backend: MockModelBackend, concepts: Vec<Concept>) -> Fixture {
        let concepts = Arc::new(InMemoryStorage::with_entities(concepts));
        let records = Arc::new(InMemoryStorage::<EmbeddingRecord>::new());
        let index = Arc::new(VectorIndex::new());
        let client = Arc::new(ModelClient::new(Arc::new(backend)));

        let service = EmbeddingService::new(concepts, records.clone(), index.clone(), client)
            .with_retry(RetryConfig::new(2).with_base_delay(1).with_max_delay(2));

        Fixture {
            records,
            index,
            service,
        }
    }

    fn concepts(n: usize) -> Vec<Concept> {
        (0..n)
            .map(|i| Concept::new(format!("c-{}", i), format!("Concept {}", i), "body"))
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_processes_all_in_expected_iterations() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), concepts(5));
        let progress: Arc<Mutex<Vec<ReconcileProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let progress_clone = progress.clone();
        let callback = move |p: &ReconcileProgress| progress_clone.lock().unwrap().push(p.clone());

        let report = f
            .service
            .reconcile_missing(2, Some(&callback))
            .await
            .unwrap();

        assert_eq!(report.iterations, 3); // ceil(5 / 2)
        assert_eq!(report.processed, 5);
        assert_eq!(report.succeeded_batches, 3);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(report.remaining, 0);

        let status = f.service.status().await.unwrap();
        assert_eq!(status.without_embedding, 0);
        assert_eq!(status.with_embedding, 5);
        assert_eq!(f.index.len(), 5);

        let reported = progress.lock().unwrap();
        assert_eq!(reported.len(), 3);
        assert_eq!(reported.last().unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn test_reconcile_with_always_failing_provider_terminates() {
        let f = fixture(
            MockModelBackend::new(ProviderKind::Gemini).with_embed_error("backend down"),
            concepts(6),
        );

        let report = f.service.reconcile_missing(2, None).await.unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.succeeded_batches, 0);
        assert_eq!(report.failed_batches, 1); // stops after the first no-progress batch
        assert_eq!(report.remaining, 6);

        let status = f.service.status().await.unwrap();
        assert_eq!(status.without_embedding, 6);
    }

    #[tokio::test]
    async fn test_poisoned_concept_skipped_without_aborting_run() {
        // "Concept 0" fails every time; the rest embed fine
        let f = fixture(
            MockModelBackend::new(ProviderKind::Gemini).with_embed_error_for("Concept 0"),
            concepts(3),
        );

        let report = f.service.reconcile_missing(2, None).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.remaining, 1);
        assert!(report.failed_batches >= 1);
        // Bounded by ceil(3/2) + safety margin
        assert!(report.iterations <= 4);

        let status = f.service.status().await.unwrap();
        assert_eq!(status.without_embedding, 1);
    }

    #[tokio::test]
    async fn test_reconcile_noop_when_nothing_missing() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), concepts(2));

        f.service.reconcile_missing(10, None).await.unwrap();
        let report = f.service.reconcile_missing(10, None).await.unwrap();

        assert_eq!(report.iterations, 0);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_embed_for_concept_updates_storage_and_index() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), concepts(1));

        f.service.embed_for_concept("c-0").await.unwrap();

        let record = f.records.get(&"c-0".to_string()).await.unwrap().unwrap();
        assert!(record.is_binary_encoded());
        assert_eq!(record.model(), "mock-embedding");

        let vector = f.index.vector_of("c-0").unwrap().unwrap();
        let hits = f.index.search(&vector, 1, 0.9, &[]).unwrap();
        assert_eq!(hits[0].entity_id, "c-0");
    }

    #[tokio::test]
    async fn test_embed_for_unknown_concept_fails() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), vec![]);

        let error = f.service.embed_for_concept("ghost").await.unwrap_err();
        assert!(matches!(error, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_legacy_record_upgraded_on_reembed() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), concepts(1));

        f.records
            .create(EmbeddingRecord::from_encoded(
                "c-0",
                "mock-embedding",
                "0.1,0.2,0.3,0.4,0.5,0.6,0.7,0.8",
            ))
            .await
            .unwrap();

        // Not missing, so reconciliation leaves it alone
        let report = f.service.reconcile_missing(10, None).await.unwrap();
        assert_eq!(report.iterations, 0);

        // An edit re-embeds and rewrites in the packed form
        f.service.embed_for_concept("c-0").await.unwrap();

        let record = f.records.get(&"c-0".to_string()).await.unwrap().unwrap();
        assert!(record.is_binary_encoded());
    }

    #[tokio::test]
    async fn test_remove_for_concept() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), concepts(1));

        f.service.embed_for_concept("c-0").await.unwrap();
        f.service.remove_for_concept("c-0").await.unwrap();

        assert!(f.records.get(&"c-0".to_string()).await.unwrap().is_none());
        assert!(f.index.vector_of("c-0").unwrap().is_none());

        let status = f.service.status().await.unwrap();
        assert_eq!(status.without_embedding, 1);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let f = fixture(MockModelBackend::new(ProviderKind::Gemini), concepts(3));

        f.service.embed_for_concept("c-1").await.unwrap();

        let status = f.service.status().await.unwrap();
        assert_eq!(status.total, 3);
        assert_eq!(status.with_embedding, 1);
        assert_eq!(status.without_embedding, 2);
        assert_eq!(status.embedding_model, "mock-embedding");
    }
}
