//! Embedding provider abstraction and an OpenAI-compatible HTTP client.
//!
//! Providers return a whole vector or an error, never a partial vector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{RecallError, Result};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(String),

    #[error("embedding API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding input is empty")]
    EmptyInput,

    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Http(err.to_string())
    }
}

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;

    /// Model identifier recorded alongside the vectors.
    fn model_name(&self) -> &str;
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for `POST {base_url}/embeddings`.
pub struct OpenAiEmbeddings {
    config: EmbeddingConfig,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("recall-core/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RecallError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(EmbeddingConfig::from_env()?)
    }

    fn request_body<'a>(&'a self, input: &'a str) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.config.model,
            input,
            // Only the text-embedding-3 family accepts a dimensions override.
            dimensions: self
                .config
                .model
                .starts_with("text-embedding-3")
                .then_some(self.config.dimensions),
        }
    }

    fn check_vector(&self, vector: Vec<f32>) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if vector.len() != self.config.dimensions {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} dimensions, got {}",
                self.config.dimensions,
                vector.len()
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::Malformed("non-finite component".into()));
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let input = truncate_chars(text.trim(), self.config.max_input_chars);
        if input.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut request = self.http_client.post(&url).json(&self.request_body(input));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.config.model, chars = input.chars().count(), "requesting embedding");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Malformed("response contained no data".into()))?
            .embedding;
        self.check_vector(vector)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
