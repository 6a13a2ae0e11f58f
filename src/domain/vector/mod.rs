//! Nearest-neighbor retrieval over the knowledge base

mod index;

pub use index::{SearchHit, VectorIndex};
