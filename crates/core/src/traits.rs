use crate::{Completion, Document, EmbeddingError, ExtractionError, GenerationError};
use async_trait::async_trait;

pub trait TextExtractor: Send + Sync {
    /// All page texts of the document, concatenated in page order.
    fn extract(&self, document: &Document) -> Result<String, ExtractionError>;
}

pub trait Embedder: Send + Sync {
    /// Vector size, when known before the first embedding.
    fn dimensions(&self) -> Option<usize>;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, GenerationError>;
}
