//! Model backend implementations

mod factory;
mod gemini;
pub(crate) mod http_client;
mod openai;

pub use factory::BackendFactory;
pub use gemini::GeminiBackend;
pub use http_client::{HttpClient, HttpClientTrait, HttpError};
pub use openai::OpenAiBackend;
