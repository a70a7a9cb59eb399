//! Chat-completion and image-generation clients for OpenAI-compatible APIs.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use folio_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("model returned no content")]
    EmptyResponse,
    #[error("decoding image payload: {0}")]
    ImageDecode(#[from] base64::DecodeError),
}

/// Raw text completion; callers extract structure from the returned content.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// PNG bytes for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ChatError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub image_model: String,
    pub temperature: f32,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            temperature: 0.2,
        }
    }
}

pub struct OpenAiClient {
    http: Arc<HttpFetcher>,
    config: OpenAiConfig,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("chat_model", &self.config.chat_model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

impl OpenAiClient {
    pub fn new(http: Arc<HttpFetcher>, config: OpenAiConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }
}

fn chat_request_body(model: &str, temperature: f32, messages: &[ChatMessage]) -> Value {
    json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
    })
}

fn first_choice_content(resp: ChatCompletionResponse) -> Result<String, ChatError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(ChatError::EmptyResponse)
}

fn first_image_bytes(resp: ImageResponse) -> Result<Vec<u8>, ChatError> {
    let encoded = resp
        .data
        .into_iter()
        .next()
        .and_then(|datum| datum.b64_json)
        .ok_or(ChatError::EmptyResponse)?;
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.config.chat_model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let body = chat_request_body(&self.config.chat_model, self.config.temperature, messages);
        let resp: ChatCompletionResponse = self
            .http
            .post_json(
                &self.endpoint("chat/completions"),
                Some(&self.config.api_key),
                &body,
            )
            .await?;
        let content = first_choice_content(resp)?;
        debug!(model = %self.config.chat_model, chars = content.len(), "chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl ImageModel for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ChatError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
            "response_format": "b64_json",
        });
        let resp: ImageResponse = self
            .http
            .post_json(
                &self.endpoint("images/generations"),
                Some(&self.config.api_key),
                &body,
            )
            .await?;
        first_image_bytes(resp)
    }
}
