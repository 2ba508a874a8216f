//! Chat-completion client used for reranking and answer generation.
//!
//! [`ChatClient`] is a single request/response exchange: a system prompt and
//! a user message in, the assistant's raw text out. [`HttpChatClient`]
//! supports OpenAI-compatible `POST {url}/v1/chat/completions` and Ollama
//! `POST {url}/api/chat`, both retried with capped exponential backoff.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::{RagError, Result, ServiceError};
use crate::http::{self, RetryPolicy};

const SERVICE: &str = "llm";

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn generate_answer(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> std::result::Result<String, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    OpenAi,
    Ollama,
}

pub struct HttpChatClient {
    client: reqwest::Client,
    format: WireFormat,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
    retry: RetryPolicy,
}

impl HttpChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (format, endpoint, api_key) = match config.provider.as_str() {
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                    RagError::InvalidInput("OPENAI_API_KEY environment variable not set".into())
                })?;
                let base = config.url.as_deref().unwrap_or("https://api.openai.com");
                (
                    WireFormat::OpenAi,
                    format!("{}/v1/chat/completions", base.trim_end_matches('/')),
                    Some(api_key),
                )
            }
            "ollama" => {
                let base = config.url.as_deref().unwrap_or("http://localhost:11434");
                (
                    WireFormat::Ollama,
                    format!("{}/api/chat", base.trim_end_matches('/')),
                    None,
                )
            }
            "disabled" => return Err(RagError::Disabled("llm")),
            other => {
                return Err(RagError::InvalidInput(format!(
                    "unknown llm provider: {}",
                    other
                )))
            }
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::InvalidInput("llm.model is required".into()))?;

        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            format,
            model,
            endpoint,
            api_key,
            temperature: config.temperature,
            retry: config.retry_policy(),
        })
    }

    fn request_body(&self, system_prompt: &str, user_message: &str) -> Value {
        let messages = serde_json::json!([
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": user_message},
        ]);
        match self.format {
            WireFormat::OpenAi => serde_json::json!({
                "model": self.model,
                "messages": messages,
                "temperature": self.temperature,
            }),
            WireFormat::Ollama => serde_json::json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
                "options": {"temperature": self.temperature},
            }),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn generate_answer(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> std::result::Result<String, ServiceError> {
        let body = self.request_body(system_prompt, user_message);
        let json = http::post_json(
            &self.client,
            SERVICE,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            &self.retry,
        )
        .await?;

        match self.format {
            WireFormat::OpenAi => parse_openai_response(&json),
            WireFormat::Ollama => parse_ollama_response(&json),
        }
    }
}

pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>> {
    Ok(Arc::new(HttpChatClient::new(config)?))
}

fn parse_openai_response(json: &Value) -> std::result::Result<String, ServiceError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing choices[0].message.content"))
}

fn parse_ollama_response(json: &Value) -> std::result::Result<String, ServiceError> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing message.content"))
}
