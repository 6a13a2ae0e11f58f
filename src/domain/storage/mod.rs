//! Generic persistence seam consumed from the hosting application

mod entity;
mod repository;

pub use entity::{StorageEntity, StorageKey};
pub use repository::Storage;
