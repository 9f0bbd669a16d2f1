use crate::ingest::SkippedDocument;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error in {filename}: {details}")]
    Parse { filename: String, details: String },

    #[error("pdf had no readable page text: {0}")]
    NoText(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from embeddings endpoint: {0}")]
    BackendResponse(String),
}

#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("embedding failed for chunk {chunk_index} of {document_name}: {source}")]
    Embedding {
        document_name: String,
        chunk_index: u64,
        #[source]
        source: EmbeddingError,
    },

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("indexing worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("the index holds no chunks")]
    EmptyIndex,

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("query has {actual} dimensions but the index has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("retrieval worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model returned no answer")]
    EmptyResponse,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing API key: set EURI_API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no documents have been processed yet")]
    NotReady,

    #[error("documents are still being processed")]
    Busy,

    #[error("the processing job belongs to another session")]
    ForeignJob,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("no usable text in the processed documents ({} skipped)", .0.len())]
    NothingIndexed(Vec<SkippedDocument>),

    #[error("chunking failed: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("index build failed: {0}")]
    IndexBuild(#[from] IndexBuildError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl SessionError {
    /// Message shown on the interactive surface.
    pub fn notice(&self) -> String {
        match self {
            SessionError::NotReady => "Please upload and process documents first!".to_string(),
            SessionError::Busy => {
                "Documents are still being processed, try again when they are ready.".to_string()
            }
            SessionError::ForeignJob => {
                "That processing job was started by another session.".to_string()
            }
            SessionError::EmptyQuestion => "Type a question about your documents.".to_string(),
            SessionError::NothingIndexed(skipped) => {
                let mut notice =
                    "None of the documents produced readable text; nothing was indexed.".to_string();
                for document in skipped {
                    notice.push_str(&format!("\n  {}: {}", document.filename, document.reason));
                }
                notice
            }
            SessionError::Chunking(error) => format!("Could not split the documents: {error}"),
            SessionError::IndexBuild(error) => format!("Processing failed: {error}"),
            SessionError::Retrieval(RetrievalError::EmptyIndex) => {
                "The document index is empty; process some documents first.".to_string()
            }
            SessionError::Retrieval(error) => format!("Searching the documents failed: {error}"),
            SessionError::Generation(error) => {
                format!("The assistant could not answer right now: {error}")
            }
        }
    }
}
