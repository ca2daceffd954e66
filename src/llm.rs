//! Chat generation capability.
//!
//! [`Generator::generate`] sends an ordered list of role-tagged messages and
//! returns the model's reply as one string. No streaming. Providers:
//! OpenAI-compatible `/v1/chat/completions` and Ollama `/api/chat`; the
//! `disabled` provider fails every call.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::embedding::{
    http_client, openai_api_key, post_json, require_model, OLLAMA_DEFAULT_URL, OPENAI_DEFAULT_URL,
};
use crate::error::QaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &ProviderConfig) -> Result<Self, QaError> {
        Ok(Self {
            model: require_model(config, "llm")?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key: openai_api_key()?,
            temperature: config.temperature,
            client: http_client(config)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let req = OpenAiChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };
        let json = post_json(
            &self.client,
            &format!("{}/v1/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &serde_json::to_value(&req)?,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        let body: OpenAiChatResponse = serde_json::from_value(json)?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| anyhow!("OpenAI chat response had no choices"))
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &ProviderConfig) -> Result<Self, QaError> {
        Ok(Self {
            model: require_model(config, "llm")?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            temperature: config.temperature,
            client: http_client(config)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let req = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let json = post_json(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &serde_json::to_value(&req)?,
            self.max_retries,
            "Ollama",
        )
        .await?;

        let body: OllamaChatResponse = serde_json::from_value(json)?;
        Ok(body.message.content.unwrap_or_default())
    }
}

/// Build the generator named by `config.provider`.
pub fn create_generator(config: &ProviderConfig) -> Result<Arc<dyn Generator>, QaError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => Err(QaError::Configuration(format!(
            "Unknown LLM provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let messages = vec![ChatMessage::system("rules"), ChatMessage::user("hi")];
        let req = OpenAiChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_openai_response_tolerates_null_content() {
        let body: OpenAiChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert_eq!(body.choices[0].message.content, None);
    }

    #[tokio::test]
    async fn test_disabled_generator_fails() {
        assert!(DisabledGenerator
            .generate(&[ChatMessage::user("hi")])
            .await
            .is_err());
    }
}
