//! Domain layer - Core entities, contracts, and invariants

pub mod cache;
pub mod concept;
pub mod embedding;
pub mod error;
pub mod linking;
pub mod llm;
pub mod session;
pub mod storage;
pub mod vector;

pub use cache::{CacheConfig, CacheStats, CachedResponse, ResponseCache};
pub use concept::Concept;
pub use embedding::{EmbeddingRecord, cosine_similarity};
pub use error::DomainError;
pub use linking::LinkProposal;
pub use llm::{
    CachedContextHandle, CompletionRequest, CompletionRequestBuilder, Message, MessageRole,
    ModelBackend, ProviderKind, RetryConfig,
};
pub use session::{ContextSession, ContextSessionManager, SessionConfig};
pub use storage::{Storage, StorageEntity, StorageKey};
pub use vector::{SearchHit, VectorIndex};
