use crate::config::ModelConfig;
use crate::error::GenerationError;
use crate::models::{Completion, RetrievedChunk};
use crate::prompt::compose_prompt;
use crate::traits::ChatModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatCompletionMessage<'a>>,
}

#[derive(Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionContent,
}

#[derive(Deserialize)]
struct ChatCompletionContent {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model served over an OpenAI-compatible `/chat/completions` API.
pub struct OpenAiChatModel {
    config: ModelConfig,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<Completion, GenerationError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![ChatCompletionMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.config.model, prompt_chars = prompt.len(), "sending chat completion");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, message });
        }

        let payload: ChatCompletionResponse = response.json().await?;
        completion_from_response(payload)
    }
}

fn completion_from_response(payload: ChatCompletionResponse) -> Result<Completion, GenerationError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| Completion { text })
        .ok_or(GenerationError::EmptyResponse)
}

#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn answer(
        &self,
        retrieved: &[RetrievedChunk],
        question: &str,
    ) -> Result<Completion, GenerationError> {
        let prompt = compose_prompt(retrieved, question);
        let completion = self.model.complete(&prompt).await?;
        info!(
            context_chunks = retrieved.len(),
            answer_chars = completion.text.len(),
            "answer generated"
        );
        Ok(completion)
    }
}
