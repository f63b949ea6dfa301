// Skiff Engine — OpenAI-dialect provider
// Handles OpenAI, OpenRouter, and any OpenAI-compatible chat-completions
// REST API. Messages are flattened, tool results travel as role=tool with a
// tool_call_id, and prompt-caching hints are attached only for claude-3
// models proxied through such gateways.

use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::types::{
    truncate_utf8, BotConfig, Message, ProviderReply, Role, ToolCall, ToolDefinition,
};
use crate::engine::http::{
    is_retryable_status, parse_retry_after, provider_client, retry_delay, MAX_RETRIES,
};
use super::{Provider, ProviderError};

pub struct OpenAiProvider {
    client: Client,
    bot_name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    api_path: String,
}

impl OpenAiProvider {
    pub fn new(config: &BotConfig) -> Self {
        OpenAiProvider {
            client: provider_client(),
            bot_name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_path: config
                .custom_api_path
                .clone()
                .unwrap_or_else(|| "/chat/completions".to_string()),
        }
    }

    /// Serialize a tool-call list in wire form (internal status stripped).
    fn format_tool_calls(calls: &[ToolCall]) -> Value {
        Value::Array(
            calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": tc.call_type,
                        "function": {
                            "name": tc.function.name,
                            "arguments": tc.function.arguments,
                        }
                    })
                })
                .collect(),
        )
    }

    /// Flatten the message log into OpenAI wire messages, prepending the
    /// system prompt. Models whose id contains "claude-3" get ephemeral
    /// cache_control on the system block and the last user text block.
    fn prepare_messages(&self, messages: &[Message], system_prompt: Option<&str>) -> Vec<Value> {
        let cacheable = self.model.contains("claude-3");
        let mut prepared = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            let mut part = json!({"type": "text", "text": prompt});
            if cacheable {
                part["cache_control"] = json!({"type": "ephemeral"});
            }
            prepared.push(json!({"role": "system", "content": [part]}));
        }

        for msg in messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut m = json!({"role": role, "content": msg.content});
            if let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                m["tool_calls"] = Self::format_tool_calls(calls);
            }
            if msg.role == Role::Tool {
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
            }
            prepared.push(m);
        }

        if cacheable {
            // Mark the last user turn so the prefix up to it is cached.
            if let Some(m) = prepared
                .iter_mut()
                .rev()
                .find(|m| m.get("role").is_some_and(|r| r == "user"))
            {
                let text = m["content"].as_str().unwrap_or_default().to_string();
                m["content"] = json!([{
                    "type": "text",
                    "text": text,
                    "cache_control": {"type": "ephemeral"},
                }]);
            }
        }

        prepared
    }

    fn parse_reply(&self, data: Value) -> Result<ProviderReply, ProviderError> {
        let Some(message) = data["choices"].get(0).map(|c| &c["message"]) else {
            let detail = data["error"]["message"]
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| data.to_string());
            return Err(ProviderError::Transport(format!(
                "API returned no choices: {}",
                truncate_utf8(&detail, 500)
            )));
        };

        let tool_calls: Option<Vec<ToolCall>> = message
            .get("tool_calls")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .filter(|calls: &Vec<ToolCall>| !calls.is_empty());

        Ok(ProviderReply {
            content: message["content"].as_str().map(|s| s.to_string()),
            tool_calls,
            model: Some(
                data["model"].as_str().unwrap_or(&self.model).to_string(),
            ),
            provider: Some(
                data["provider"].as_str().unwrap_or(&self.bot_name).to_string(),
            ),
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn call(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}{}", self.base_url, self.api_path);

        let mut body = json!({
            "model": self.model,
            "messages": self.prepare_messages(messages, system_prompt),
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        info!("[skiff] openai request to {} model={}", url, self.model);

        let mut last_error = String::new();
        let mut last_status: u16 = 0;
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!(
                    "[skiff] openai retry {}/{} after {}ms",
                    attempt,
                    MAX_RETRIES,
                    delay.as_millis()
                );
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("HTTP request failed: {}", e);
                    last_status = 0;
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(ProviderError::Transport(last_error));
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                last_status = status;
                retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!("HTTP {}: {}", status, truncate_utf8(&body_text, 500));
                error!("[skiff] openai error {}", last_error);

                // Auth errors are never retried.
                if status == 401 || status == 403 {
                    return Err(ProviderError::Auth(last_error));
                }
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    continue;
                }
                return if status == 429 {
                    Err(ProviderError::RateLimited(last_error))
                } else {
                    Err(ProviderError::Api { status, message: last_error })
                };
            }

            let data: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Transport(format!("invalid JSON response: {}", e)))?;
            return self.parse_reply(data);
        }

        // All retries exhausted — classify the last error.
        match last_status {
            0 => Err(ProviderError::Transport(last_error)),
            429 => Err(ProviderError::RateLimited(last_error)),
            s => Err(ProviderError::Api { status: s, message: last_error }),
        }
    }
}
