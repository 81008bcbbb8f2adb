use crate::config::AnthropicConfig;
use crate::providers::base::{
    ChatMessage, ChatProvider, ChatRequest, ChatResponse, ChatRole, FunctionCall, FunctionSchema,
};
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic Messages API client with tool use mapped onto function calls.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: &AnthropicConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| API_URL.to_string()),
            client: provider_http_client(),
        }
    }
}

/// Convert chat history to Anthropic message blocks, merging runs of
/// same-role messages (the API rejects consecutive user turns, which
/// happens when several function results follow one another).
pub fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut converted: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            ChatRole::User => {
                let blocks = if let Some(result) = &msg.function_result {
                    let mut block = json!({
                        "type": "tool_result",
                        "tool_use_id": result.call_id,
                        "content": result.content,
                    });
                    if result.is_error {
                        block["is_error"] = json!(true);
                    }
                    vec![block]
                } else {
                    vec![json!({"type": "text", "text": msg.content})]
                };
                ("user", blocks)
            }
            ChatRole::Assistant => {
                let mut blocks = Vec::new();
                // Empty text blocks are rejected
                if !msg.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.content}));
                }
                for call in &msg.function_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                if blocks.is_empty() {
                    continue;
                }
                ("assistant", blocks)
            }
        };

        if let Some((last_role, last_blocks)) = converted.last_mut()
            && *last_role == role
        {
            last_blocks.extend(blocks);
            continue;
        }
        converted.push((role, blocks));
    }

    converted
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect()
}

pub fn convert_functions(functions: &[FunctionSchema]) -> Vec<Value> {
    functions
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "description": f.description,
                "input_schema": f.parameters,
            })
        })
        .collect()
}

/// Parse a Messages API response. Text blocks are concatenated.
pub fn parse_response(json: &Value) -> ChatResponse {
    let mut text_parts = Vec::new();
    let mut function_calls = Vec::new();

    if let Some(blocks) = json["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        text_parts.push(text.to_string());
                    }
                }
                Some("tool_use") => function_calls.push(FunctionCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                }),
                _ => {}
            }
        }
    }

    let usage = json.get("usage");
    ChatResponse {
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        },
        function_calls,
        input_tokens: usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(Value::as_u64),
        output_tokens: usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(Value::as_u64),
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        debug!(
            "anthropic chat: model={}, messages={}",
            self.model,
            req.messages.len()
        );
        let mut payload = json!({
            "model": self.model,
            "messages": convert_messages(&req.messages),
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });
        if !req.system.is_empty() {
            payload["system"] = json!(req.system);
        }
        if !req.functions.is_empty() {
            payload["tools"] = Value::Array(convert_functions(&req.functions));
            payload["tool_choice"] = json!({"type": "auto"});
        }

        let resp = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let json = ProviderErrorHandler::check_json(resp, "Anthropic").await?;
        let response = parse_response(&json);
        debug!(
            "anthropic chat complete: input_tokens={:?}, output_tokens={:?}, calls={}",
            response.input_tokens,
            response.output_tokens,
            response.function_calls.len()
        );
        Ok(response)
    }
}
