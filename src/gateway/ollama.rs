use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingGateway, GenerationGateway};
use crate::core::config::settings::{GatewaySettings, OllamaSettings};
use crate::core::errors::{ApiError, GatewayError};

/// HTTP client for a local Ollama server, serving both embeddings and chat.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    llm_model: String,
    embedding_model: String,
    api_key: Option<String>,
    embed_timeout: Duration,
    generate_timeout: Duration,
    client: Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(ollama: &OllamaSettings, gateway: &GatewaySettings) -> Self {
        Self {
            base_url: ollama.base_url.trim_end_matches('/').to_string(),
            llm_model: ollama.llm_model.clone(),
            embedding_model: ollama.embedding_model.clone(),
            api_key: ollama.api_key.clone(),
            embed_timeout: gateway.embed_timeout(),
            generate_timeout: gateway.generate_timeout(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the server answers at all. Used by `/health`.
    pub async fn health_check(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5));
        match self.authorize(request).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let request = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(self.embed_timeout)
            .json(&json!({ "model": self.embedding_model, "prompt": text }));

        let res = self.authorize(request).send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::EmbeddingTimeout(self.embed_timeout)
            } else {
                GatewayError::EmbeddingUnavailable(err.to_string())
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::EmbeddingUnavailable(format!(
                "{} ({}): {}",
                self.embedding_model, status, body
            ))
            .into());
        }

        let payload: EmbeddingResponse = res
            .json()
            .await
            .map_err(|err| GatewayError::EmbeddingUnavailable(err.to_string()))?;
        Ok(payload.embedding)
    }
}

#[async_trait]
impl GenerationGateway for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, context: &str, query: &str) -> Result<String, ApiError> {
        let body = json!({
            "model": self.llm_model,
            "messages": [
                { "role": "system", "content": context },
                { "role": "user", "content": query },
            ],
            "stream": false,
        });
        let request = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.generate_timeout)
            .json(&body);

        let res = self.authorize(request).send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::GenerationTimeout(self.generate_timeout)
            } else {
                GatewayError::GenerationUnavailable(err.to_string())
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let detail = format!("{} ({}): {}", self.llm_model, status, body);
            return Err(classify_generation_status(status, detail).into());
        }

        let payload: ChatResponse = res
            .json()
            .await
            .map_err(|err| GatewayError::GenerationUnavailable(err.to_string()))?;
        let content = payload
            .message
            .map(|message| message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(GatewayError::GenerationRefused(format!(
                "{} returned an empty completion",
                self.llm_model
            ))
            .into());
        }
        Ok(content)
    }
}

/// Missing model, overload and server faults may clear up; other client
/// errors mean the model declined the request.
fn classify_generation_status(status: StatusCode, detail: String) -> GatewayError {
    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        );
    if retryable {
        GatewayError::GenerationUnavailable(detail)
    } else {
        GatewayError::GenerationRefused(detail)
    }
}
