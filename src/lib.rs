//! Noema core
//!
//! Model orchestration and semantic retrieval for the Noema personal
//! knowledge base:
//! - A provider-agnostic model client with a fallback-model cascade and
//!   structured-output repair retries
//! - A semantic response cache looked up by prompt-fingerprint similarity
//! - Context sessions bridged to provider-side context caching
//! - An in-memory vector index with background embedding reconciliation
//!
//! Persistence, UI, and process wiring live in the hosting application;
//! this crate consumes storage through the `domain::storage::Storage`
//! seam and exposes services through `CoreState`.

pub mod config;
pub mod domain;
pub mod infrastructure;

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::info;

pub use config::AppConfig;
use domain::cache::{CachedResponse, ResponseCache};
use domain::concept::Concept;
use domain::embedding::EmbeddingRecord;
use domain::llm::ModelBackend;
use domain::session::{ContextSession, ContextSessionManager};
use domain::storage::Storage;
use domain::vector::VectorIndex;
use infrastructure::llm::BackendFactory;
use infrastructure::services::{EmbeddingService, LinkService, ModelClient};
use infrastructure::storage::InMemoryStorage;

/// The storage handles this core consumes from the hosting application.
pub struct CoreStores {
    pub concepts: Arc<dyn Storage<Concept>>,
    pub embedding_records: Arc<dyn Storage<EmbeddingRecord>>,
    pub sessions: Arc<dyn Storage<ContextSession>>,
    pub cached_responses: Arc<dyn Storage<CachedResponse>>,
}

impl CoreStores {
    /// In-memory stores, for development and tests.
    pub fn in_memory() -> Self {
        Self {
            concepts: Arc::new(InMemoryStorage::<Concept>::new()),
            embedding_records: Arc::new(InMemoryStorage::<EmbeddingRecord>::new()),
            sessions: Arc::new(InMemoryStorage::<ContextSession>::new()),
            cached_responses: Arc::new(InMemoryStorage::<CachedResponse>::new()),
        }
    }
}

/// All core services, wired once and passed explicitly to callers.
pub struct CoreState {
    pub client: Arc<ModelClient>,
    pub response_cache: Arc<ResponseCache>,
    pub sessions: Arc<ContextSessionManager>,
    pub index: Arc<VectorIndex>,
    pub embeddings: Arc<EmbeddingService>,
    pub links: Arc<LinkService>,
}

/// Build the core, resolving the backend from configured credentials.
pub async fn create_core_state(
    config: &AppConfig,
    stores: CoreStores,
) -> anyhow::Result<CoreState> {
    let backend = BackendFactory::resolve(config.provider)?;
    create_core_state_with_backend(config, stores, backend).await
}

/// Build the core around an already-constructed backend.
pub async fn create_core_state_with_backend(
    config: &AppConfig,
    stores: CoreStores,
    backend: Arc<dyn ModelBackend>,
) -> anyhow::Result<CoreState> {
    let response_cache = Arc::new(
        ResponseCache::new(stores.cached_responses.clone(), backend.clone())
            .with_config(config.cache.clone()),
    );

    let sessions = Arc::new(
        ContextSessionManager::new(stores.sessions.clone(), backend.clone())
            .with_config(config.session.clone()),
    );

    let mut client = ModelClient::new(backend)
        .with_retry(config.retry.clone())
        .with_cache(response_cache.clone())
        .with_sessions(sessions.clone());

    if let Some(ref model) = config.model {
        client = client.with_model(model.clone());
    }

    if let Some(temperature) = config.temperature {
        client = client.with_temperature(temperature);
    }

    let client = Arc::new(client);

    let index = Arc::new(VectorIndex::new());
    let loaded = index.initialize(stores.embedding_records.as_ref()).await?;
    info!(loaded, "vector index initialized from embedding storage");

    let embeddings = Arc::new(
        EmbeddingService::new(
            stores.concepts.clone(),
            stores.embedding_records.clone(),
            index.clone(),
            client.clone(),
        )
        .with_retry(config.retry.clone()),
    );

    let links = Arc::new(LinkService::new(
        stores.concepts.clone(),
        index.clone(),
        client.clone(),
    ));

    Ok(CoreState {
        client,
        response_cache,
        sessions,
        index,
        embeddings,
        links,
    })
}

static DEFAULT_CORE: Lazy<RwLock<Option<Arc<CoreState>>>> = Lazy::new(|| RwLock::new(None));

/// The process-wide default core, if one has been installed.
///
/// Services take their dependencies explicitly; this accessor exists
/// only for the outermost boundary of the hosting application.
pub fn default_core() -> Option<Arc<CoreState>> {
    DEFAULT_CORE.read().ok().and_then(|guard| guard.clone())
}

/// Install the process-wide default core, replacing any previous one.
pub fn set_default_core(core: Arc<CoreState>) {
    if let Ok(mut guard) = DEFAULT_CORE.write() {
        *guard = Some(core);
    }
}

/// Remove the process-wide default core. Tests use this to isolate.
pub fn reset_default_core() {
    if let Ok(mut guard) = DEFAULT_CORE.write() {
        *guard = None;
    }
}
