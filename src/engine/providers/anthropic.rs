// Skiff Engine — Anthropic-dialect provider
// Messages API: system prompt as a top-level param, tool uses as content
// blocks, tool results as user messages carrying a tool_use_id, and
// consecutive same-role messages merged (the API requires alternation).

use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::types::{
    truncate_utf8, BotConfig, FunctionCall, Message, ProviderReply, Role, ToolCall,
    ToolDefinition,
};
use crate::engine::http::{
    is_retryable_status, parse_retry_after, provider_client, retry_delay, MAX_RETRIES,
};
use super::{Provider, ProviderError};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    client: Client,
    bot_name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    api_path: String,
}

impl AnthropicProvider {
    pub fn new(config: &BotConfig) -> Self {
        AnthropicProvider {
            client: provider_client(),
            bot_name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            api_path: config
                .custom_api_path
                .clone()
                .unwrap_or_else(|| "/v1/messages".to_string()),
        }
    }

    /// Convert the internal log to Messages-API form.
    fn prepare_messages(messages: &[Message]) -> Vec<Value> {
        let mut converted: Vec<Value> = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    for tc in msg.tool_calls.as_deref().unwrap_or_default() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.function.name,
                            "input": tc.parsed_arguments(),
                        }));
                    }
                    if blocks.is_empty() {
                        blocks.push(json!({"type": "text", "text": ""}));
                    }
                    converted.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Tool => {
                    let tool_use_id = msg.tool_call_id.as_deref().unwrap_or("unknown");
                    converted.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": tool_use_id,
                            "content": msg.content,
                        }],
                    }));
                }
                Role::User => {
                    converted.push(json!({"role": "user", "content": msg.content}));
                }
            }
        }

        Self::merge_consecutive_roles(converted)
    }

    /// The Messages API requires strictly alternating roles, so adjacent
    /// same-role messages (e.g. tool results followed by a user turn) are
    /// merged into one block list.
    fn merge_consecutive_roles(converted: Vec<Value>) -> Vec<Value> {
        let mut merged: Vec<Value> = Vec::with_capacity(converted.len());
        for mut msg in converted {
            match merged.last_mut() {
                Some(prev) if prev["role"] == msg["role"] => {
                    let mut prev_blocks = to_blocks(prev["content"].take());
                    prev_blocks.extend(to_blocks(msg["content"].take()));
                    prev["content"] = Value::Array(prev_blocks);
                }
                _ => merged.push(msg),
            }
        }
        merged
    }

    /// Convert OpenAI-format tool specs to Anthropic's shape.
    fn prepare_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "input_schema": t.function.parameters,
                })
            })
            .collect()
    }

    fn parse_reply(&self, data: Value) -> Result<ProviderReply, ProviderError> {
        let Some(blocks) = data["content"].as_array() else {
            let detail = data["error"]["message"]
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| data.to_string());
            return Err(ProviderError::Transport(format!(
                "API returned no content: {}",
                truncate_utf8(&detail, 500)
            )));
        };

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => content.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].to_string(),
                    },
                    status: None,
                }),
                _ => {}
            }
        }

        Ok(ProviderReply {
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            model: Some(data["model"].as_str().unwrap_or(&self.model).to_string()),
            provider: Some(self.bot_name.clone()),
        })
    }
}

fn to_blocks(content: Value) -> Vec<Value> {
    match content {
        Value::Array(blocks) => blocks,
        Value::String(text) => vec![json!({"type": "text", "text": text})],
        other => vec![json!({"type": "text", "text": other.to_string()})],
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            "messages": Self::prepare_messages(messages),
            "max_tokens": self.max_tokens,
        });
        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            body["system"] = json!(prompt);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::prepare_tools(tools));
        }

        info!("[skiff] anthropic request to {} model={}", url, self.model);

        let mut last_error = String::new();
        let mut last_status: u16 = 0;
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!(
                    "[skiff] anthropic retry {}/{} after {}ms",
                    attempt,
                    MAX_RETRIES,
                    delay.as_millis()
                );
            }

            let response = match self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
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
                error!("[skiff] anthropic error {}", last_error);

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

        match last_status {
            0 => Err(ProviderError::Transport(last_error)),
            429 => Err(ProviderError::RateLimited(last_error)),
            s => Err(ProviderError::Api { status: s, message: last_error }),
        }
    }
}
