pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod session;
pub mod traits;

pub use chunking::{build_chunks, reassemble, split_text, ChunkingConfig};
pub use config::ModelConfig;
pub use embeddings::{
    build_embedder, CharacterNgramEmbedder, EmbeddingBackend, EmbeddingConfig, RemoteEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_LOCAL_MODEL,
};
pub use error::{
    ChunkingError, ConfigError, EmbeddingError, ExtractionError, GenerationError, IndexBuildError,
    RetrievalError, SessionError,
};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText};
pub use generation::{AnswerGenerator, OpenAiChatModel};
pub use index::{IndexBuilder, Retriever, VectorIndex, DEFAULT_TOP_K};
pub use ingest::{discover_pdf_files, ingest_documents, IngestionReport, SkippedDocument};
pub use models::{Chunk, Completion, Device, Document, Message, RetrievedChunk, Role};
pub use prompt::compose_prompt;
pub use session::{ProcessingJob, ProcessingReport, Session, SessionOptions, SessionState};
pub use traits::{ChatModel, Embedder, TextExtractor};
