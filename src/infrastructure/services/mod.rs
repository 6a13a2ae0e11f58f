//! Orchestration services over the domain layer

mod embedding_service;
mod link_service;
mod model_client;

pub use embedding_service::{
    EmbeddingService, EmbeddingStatus, ProgressCallback, ReconcileProgress, ReconcileReport,
};
pub use link_service::LinkService;
pub use model_client::{CompletionOptions, ModelClient};
