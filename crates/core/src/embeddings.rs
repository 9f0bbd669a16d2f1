use crate::error::EmbeddingError;
use crate::models::Device;
use crate::traits::Embedder;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle};
use tracing::{info, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingBackend {
    CharacterNgram,
    /// Sentence-embedding model run in-process through fastembed.
    Local { model: String },
    Remote {
        base_url: String,
        model: String,
        api_key: Option<String>,
    },
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        if cfg!(feature = "local-embeddings-fastembed") {
            EmbeddingBackend::Local {
                model: DEFAULT_LOCAL_MODEL.to_string(),
            }
        } else {
            EmbeddingBackend::CharacterNgram
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub device: Device,
    /// `None` uses the backend's own size; remote models report theirs with
    /// the first embedding.
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            device: Device::Cpu,
            dimensions: None,
        }
    }
}

pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    if config.dimensions == Some(0) {
        return Err(EmbeddingError::ModelLoad(
            "embedding dimensions must be greater than zero".to_string(),
        ));
    }

    match &config.backend {
        EmbeddingBackend::CharacterNgram => {
            if config.device == Device::Gpu {
                return Err(EmbeddingError::ModelLoad(
                    "the character n-gram embedder only runs on the cpu".to_string(),
                ));
            }
            let dimensions = config.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
            info!(dimensions, "using character n-gram embeddings");
            Ok(Arc::new(CharacterNgramEmbedder { dimensions }))
        }
        EmbeddingBackend::Local { model } => local::build(model, config.device, config.dimensions),
        EmbeddingBackend::Remote {
            base_url,
            model,
            api_key,
        } => {
            if config.device == Device::Gpu {
                warn!(%base_url, "device selection is up to the remote embeddings service");
            }
            info!(%base_url, %model, "using remote embeddings");
            Ok(Arc::new(RemoteEmbedder::new(
                base_url.clone(),
                model.clone(),
                api_key.clone(),
                config.dimensions,
            )))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions.max(1))
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
///
/// `embed` blocks the calling thread. It drives the request on the current
/// runtime's handle, so it must run on a blocking worker
/// (`tokio::task::spawn_blocking`) or outside any runtime.
pub struct RemoteEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: Option<usize>,
    client: Client,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dimensions,
            client: Client::new(),
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: text,
            });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse(format!(
                "{}/embeddings returned {}",
                self.base_url,
                response.status()
            )));
        }

        let payload: EmbeddingsResponse = response.json().await?;
        payload
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| EmbeddingError::BackendResponse("no embedding in response".to_string()))
    }
}

impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match Handle::try_current() {
            Ok(handle) => handle.block_on(self.request(text)),
            Err(_) => Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|error| EmbeddingError::ModelLoad(error.to_string()))?
                .block_on(self.request(text)),
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
        match name {
            "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
            "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
            "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
            "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
            other => Err(EmbeddingError::ModelLoad(format!(
                "unknown local embedding model `{other}`, expected one of: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5, multilingual-e5-small"
            ))),
        }
    }

    /// The model is loaded (and downloaded on first use) by the first
    /// `embed` call, which runs on the processing worker.
    pub struct FastembedEmbedder {
        model: EmbeddingModel,
        model_name: String,
        device: Device,
        dimensions: usize,
        loaded: Mutex<Option<TextEmbedding>>,
    }

    impl FastembedEmbedder {
        fn init_options(&self) -> InitOptions {
            let options = InitOptions::new(self.model.clone()).with_show_download_progress(false);
            match self.device {
                Device::Cpu => options,
                Device::Gpu => options.with_execution_providers(vec![
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .build()
                        .error_on_failure(),
                ]),
            }
        }
    }

    impl Embedder for FastembedEmbedder {
        fn dimensions(&self) -> Option<usize> {
            Some(self.dimensions)
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut guard = self
                .loaded
                .lock()
                .map_err(|_| EmbeddingError::ModelLoad("embedding model lock poisoned".to_string()))?;

            if guard.is_none() {
                info!(model = %self.model_name, device = ?self.device, "loading local embedding model");
                let model = TextEmbedding::try_new(self.init_options()).map_err(|error| {
                    EmbeddingError::ModelLoad(format!("{}: {error}", self.model_name))
                })?;
                *guard = Some(model);
            }

            let model = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::ModelLoad(self.model_name.clone()))?;
            model
                .embed(vec![text], None)
                .map_err(|error| EmbeddingError::BackendResponse(error.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::BackendResponse("no embedding produced".to_string()))
        }
    }

    pub(super) fn build(
        name: &str,
        device: Device,
        dimensions: Option<usize>,
    ) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let (model, native) = resolve_model(name)?;
        if let Some(requested) = dimensions.filter(|requested| *requested != native) {
            return Err(EmbeddingError::ModelLoad(format!(
                "{name} produces {native}-dimensional vectors, not {requested}"
            )));
        }

        info!(model = name, ?device, dimensions = native, "using local embeddings");
        Ok(Arc::new(FastembedEmbedder {
            model,
            model_name: name.to_string(),
            device,
            dimensions: native,
            loaded: Mutex::new(None),
        }))
    }
}

#[cfg(not(feature = "local-embeddings-fastembed"))]
mod local {
    use super::*;

    pub(super) fn build(
        name: &str,
        _device: Device,
        _dimensions: Option<usize>,
    ) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        Err(EmbeddingError::ModelLoad(format!(
            "local model {name} needs a build with --features local-embeddings-fastembed"
        )))
    }
}
