//! Text generation service: the chat-completion leaf of the pipeline.
//!
//! The pipeline only depends on [`TextGenerator`]. The production
//! implementation, [`LlmTextGenerator`], delegates to an edgequake-llm
//! provider so any backend it supports (OpenRouter, OpenAI, Anthropic,
//! Gemini, Ollama) can write the story. No retry happens at this layer;
//! callers decide how to treat a failure.

use crate::error::ServiceError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// `response_format` value asking the provider for a single JSON object.
pub const JSON_OBJECT_FORMAT: &str = "json_object";

/// Sampling options for one text-generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    /// Request JSON mode from the provider.
    pub json: bool,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
}

impl GenerationOptions {
    pub fn new(temperature: f32, max_tokens: usize) -> Self {
        Self {
            temperature,
            max_tokens,
            json: false,
            presence_penalty: None,
            frequency_penalty: None,
        }
    }

    pub fn json_mode(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_penalties(mut self, presence: f32, frequency: f32) -> Self {
        self.presence_penalty = Some(presence);
        self.frequency_penalty = Some(frequency);
        self
    }
}

/// Chat-completion service returning raw assistant text.
///
/// The text is *expected* to contain JSON but nothing here enforces it; the
/// parsing stages degrade gracefully when it does not.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ServiceError>;
}

/// [`TextGenerator`] backed by an edgequake-llm provider.
pub struct LlmTextGenerator {
    provider: Arc<dyn LLMProvider>,
    timeout_secs: u64,
}

impl LlmTextGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout_secs: u64) -> Self {
        Self {
            provider,
            timeout_secs,
        }
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ServiceError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        let completion = build_options(options);

        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&completion)),
        )
        .await
        .map_err(|_| ServiceError::Timeout {
            service: "text generation".to_string(),
            secs: self.timeout_secs,
        })?
        .map_err(|e| ServiceError::Provider(format!("{}", e)))?;

        debug!(
            "Text generation: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(response.content)
    }
}

/// Map pipeline options onto the provider's `CompletionOptions`.
fn build_options(options: &GenerationOptions) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(options.temperature),
        max_tokens: Some(options.max_tokens),
        presence_penalty: options.presence_penalty,
        frequency_penalty: options.frequency_penalty,
        response_format: options.json.then(|| JSON_OBJECT_FORMAT.to_string()),
        ..Default::default()
    }
}
