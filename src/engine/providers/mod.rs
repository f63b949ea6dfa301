// Skiff Engine — Chat-completions providers
// One capability, two wire dialects. AnyProvider wraps Box<dyn Provider> so
// the agent loop and the worker never know which backend is in use; all
// dialect translation lives inside the concrete implementations.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::atoms::types::{ApiDialect, BotConfig, Message, ProviderReply, ToolDefinition};

// ── Boundary error model ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    /// 401/403 — bad or missing credentials. Never retried.
    #[error("auth error: {0}")]
    Auth(String),

    /// Non-2xx API response that survived retry classification.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// 429 after retries were exhausted.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network / parse failure with no usable status.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Non-retryable client-side failure (4xx). The loop turns these into a
    /// synthetic assistant message; everything else is a plain error the
    /// queue may redeliver.
    pub fn is_client_error(&self) -> bool {
        match self {
            ProviderError::Auth(_) => true,
            ProviderError::Api { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}

// ── Provider capability ────────────────────────────────────────────────────

/// One non-streaming chat-completions round trip.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Result<ProviderReply, ProviderError>;
}

// ── Provider factory ───────────────────────────────────────────────────────

/// Type-erased provider. Callers hold `AnyProvider` and call `.call()`
/// without knowing which concrete backend is in use.
pub struct AnyProvider(Box<dyn Provider>);

impl AnyProvider {
    /// Construct the right concrete provider for a bot config's dialect.
    pub fn from_config(config: &BotConfig) -> Self {
        let provider: Box<dyn Provider> = match config.dialect() {
            ApiDialect::Anthropic => Box::new(AnthropicProvider::new(config)),
            ApiDialect::OpenAi => Box::new(OpenAiProvider::new(config)),
        };
        AnyProvider(provider)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub async fn call(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Result<ProviderReply, ProviderError> {
        self.0.call(messages, system_prompt, tools).await
    }
}

impl AsRef<dyn Provider> for AnyProvider {
    fn as_ref(&self) -> &(dyn Provider + 'static) {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert!(ProviderError::Auth("nope".into()).is_client_error());
        assert!(ProviderError::Api { status: 404, message: String::new() }.is_client_error());
        assert!(ProviderError::Api { status: 422, message: String::new() }.is_client_error());
        assert!(!ProviderError::Api { status: 500, message: String::new() }.is_client_error());
        assert!(!ProviderError::RateLimited("slow down".into()).is_client_error());
        assert!(!ProviderError::Transport("reset".into()).is_client_error());
    }

    #[test]
    fn factory_selects_by_dialect() {
        let mut config = BotConfig {
            name: "default".into(),
            base_url: "https://api.example.com/v1".into(),
            api_key: "k".into(),
            api_type: None,
            model: "gpt-4o".into(),
            description: None,
            max_tokens: None,
            custom_api_path: None,
        };
        assert_eq!(AnyProvider::from_config(&config).name(), "openai");
        config.api_type = Some(ApiDialect::Anthropic);
        assert_eq!(AnyProvider::from_config(&config).name(), "anthropic");
    }
}
