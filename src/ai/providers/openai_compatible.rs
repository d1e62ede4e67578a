//! Generic OpenAI-wire-protocol provider adapter (spec.md §6).
//!
//! Works against any endpoint that speaks the OpenAI chat-completions
//! protocol: OpenAI itself, Anthropic's OpenAI-compat shim, Gemini's
//! OpenAI-compat endpoint, Mistral, OpenRouter, local servers. Differences
//! between concrete providers are confined to `OpenAICompatibleConfig`
//! construction (base URL, auth header, per-model rate card) — the wire
//! plumbing below is shared.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::ai::provider::{LLMProvider, ProviderError, Result, StreamResponse};
use crate::ai::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message as AppMessage, MessageContent,
    MessageRole, StreamChunk, ToolCallDelta, ToolSchema, TokenUsage,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "default_function_type")]
    kind: String,
    function: ApiFunctionCall,
}

fn default_function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    /// OpenAI sends this as a JSON-encoded string, not a nested object.
    arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolDef {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunctionDef,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamResponse {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// A single `$ per 1M tokens` rate entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateCard {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Configuration for an OpenAI-wire-protocol provider.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub extra_headers: HashMap<String, String>,
    /// Per-model rate cards, keyed by model id. Unknown models cost $0 —
    /// callers should keep this populated from config rather than relying
    /// on a hardcoded default (spec.md §3 "Cost history").
    pub rates: HashMap<String, RateCard>,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            extra_headers: HashMap::new(),
            rates: HashMap::new(),
        }
    }
}

impl OpenAICompatibleConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_rate(mut self, model: impl Into<String>, rate: RateCard) -> Self {
        self.rates.insert(model.into(), rate);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Generic OpenAI-wire-protocol provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    config: OpenAICompatibleConfig,
    provider_name: String,
    context_limit: usize,
}

impl OpenAICompatibleProvider {
    pub fn new(
        config: OpenAICompatibleConfig,
        provider_name: impl Into<String>,
        context_limit: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client init: {e}")))?;

        Ok(Self {
            client,
            config,
            provider_name: provider_name.into(),
            context_limit,
        })
    }

    fn convert_message(msg: &AppMessage) -> ApiMessage {
        match msg.role {
            MessageRole::System => ApiMessage {
                role: "system".into(),
                content: Some(msg.content.as_text()),
                ..Default::default()
            },
            MessageRole::User => ApiMessage {
                role: "user".into(),
                content: Some(msg.content.as_text()),
                ..Default::default()
            },
            MessageRole::Assistant => ApiMessage {
                role: "assistant".into(),
                content: if msg.content.as_text().is_empty() {
                    None
                } else {
                    Some(msg.content.as_text())
                },
                tool_calls: if msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        msg.tool_calls
                            .iter()
                            .map(|t| ApiToolCall {
                                id: t.id.clone(),
                                kind: default_function_type(),
                                function: ApiFunctionCall {
                                    name: t.name.clone(),
                                    arguments: t.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                ..Default::default()
            },
            MessageRole::Tool => {
                let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
                let content = match &msg.content {
                    MessageContent::Blocks(blocks) => blocks
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolResult { content, .. } => Some(content.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                    other => other.as_text(),
                };
                ApiMessage {
                    role: "tool".into(),
                    content: Some(content),
                    tool_call_id: Some(tool_call_id),
                    ..Default::default()
                }
            }
        }
    }

    fn convert_tool(tool: &ToolSchema) -> ApiToolDef {
        ApiToolDef {
            kind: "function",
            function: ApiFunctionDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(request.system.clone()),
                ..Default::default()
            });
        }
        messages.extend(request.messages.iter().map(Self::convert_message));

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            tools: request.tools.iter().map(Self::convert_tool).collect(),
            stream: if stream { Some(true) } else { None },
        }
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    fn extract_tool_calls(calls: &Option<Vec<ApiToolCall>>) -> Vec<ToolCallDelta> {
        calls
            .as_ref()
            .map(|cs| {
                cs.iter()
                    .map(|c| ToolCallDelta {
                        id: c.id.clone(),
                        name: c.function.name.clone(),
                        arguments: serde_json::from_str(&c.function.arguments)
                            .unwrap_or(Value::Null),
                        provider_extra: HashMap::new(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Classifies an HTTP status/body into the shared retry taxonomy
    /// (spec.md §7 "Retryable transport" vs "Hard LLM error").
    fn classify_status(status: StatusCode, body: &str) -> ProviderError {
        let retryable_text = body.contains("overloaded")
            || body.contains("service_tier_capacity_exceeded")
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error();
        if retryable_text {
            ProviderError::RetryableTransport(format!("{status}: {body}"))
        } else {
            ProviderError::HardFailure(format!("{status}: {body}"))
        }
    }

    async fn execute_with_retry(
        &self,
        url: &str,
        body: &ChatCompletionRequest,
    ) -> Result<Response> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let mut builder = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(auth) = self.auth_header() {
                builder = builder.header("Authorization", auth);
            }
            for (key, value) in &self.config.extra_headers {
                builder = builder.header(key, value);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let error_body = response.text().await.unwrap_or_default();
                    let classified = Self::classify_status(status, &error_body);
                    if !classified.is_failover_eligible() {
                        return Err(classified);
                    }
                    last_error = Some(classified);
                }
                Err(e) => {
                    last_error = Some(ProviderError::RetryableTransport(e.to_string()));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::RetryableTransport("request failed".into())))
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn call(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_request = self.build_request(&request, false);
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self.execute_with_retry(&url, &api_request).await?;

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::HardFailure(format!("malformed response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::HardFailure("no choices in response".into()))?;

        let usage = api_response.usage.map(|u| {
            let cost = self.cost_usd(&request.model, u.prompt_tokens, u.completion_tokens);
            TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
                cost_usd: cost,
            }
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: Self::extract_tool_calls(&choice.message.tool_calls),
            model: request.model,
            usage,
            finish_reason: choice.finish_reason,
        })
    }

    async fn call_streaming(
        &self,
        request: CompletionRequest,
        on_chunk: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<CompletionResponse> {
        let api_request = self.build_request(&request, true);
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self.execute_with_retry(&url, &api_request).await?;
        let mut event_stream = response.bytes_stream().eventsource();

        let mut full_text = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(event) = event_stream.next().await {
            let event = event
                .map_err(|e| ProviderError::RetryableTransport(format!("sse error: {e}")))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: ApiStreamResponse = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Some(u) = chunk.usage {
                usage = Some(u);
            }
            if let Some(choice) = chunk.choices.into_iter().next() {
                if let Some(delta) = choice.delta.content {
                    full_text.push_str(&delta);
                    on_chunk(&delta);
                }
                if let Some(calls) = choice.delta.tool_calls {
                    tool_calls.extend(Self::extract_tool_calls(&Some(calls)));
                }
                if choice.finish_reason.is_some() {
                    finish_reason = choice.finish_reason;
                }
            }
        }

        let usage = usage.map(|u| {
            let cost = self.cost_usd(&request.model, u.prompt_tokens, u.completion_tokens);
            TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
                cost_usd: cost,
            }
        });

        Ok(CompletionResponse {
            content: full_text,
            tool_calls,
            model: request.model,
            usage,
            finish_reason,
        })
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn cost_usd(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let Some(rate) = self.config.rates.get(model) else {
            return 0.0;
        };
        (input_tokens as f64 / 1_000_000.0) * rate.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * rate.output_per_million
    }
}

#[allow(dead_code)]
fn _assert_stream_response_type_still_exists(_: Option<StreamResponse>) {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn gemini_config(key: &str) -> OpenAICompatibleConfig {
        OpenAICompatibleConfig::new(
            key,
            "https://generativelanguage.googleapis.com/v1beta/openai",
        )
        .with_rate(
            "gemini-2.5-flash",
            RateCard {
                input_per_million: 0.075,
                output_per_million: 0.30,
            },
        )
    }

    #[test]
    fn provider_creation_succeeds() {
        let provider =
            OpenAICompatibleProvider::new(gemini_config("test-key"), "gemini", 1_000_000);
        assert!(provider.is_ok());
    }

    #[test]
    fn provider_traits_report_name_and_limit() {
        let provider =
            OpenAICompatibleProvider::new(gemini_config("test-key"), "gemini", 1_000_000)
                .unwrap();
        assert_eq!(provider.provider_name(), "gemini");
        assert!(provider.supports_tools());
        assert_eq!(provider.context_limit(), 1_000_000);
    }

    #[test]
    fn cost_usd_uses_configured_rate_card() {
        let provider =
            OpenAICompatibleProvider::new(gemini_config("test-key"), "gemini", 1_000_000)
                .unwrap();
        let cost = provider.cost_usd("gemini-2.5-flash", 1_000_000, 1_000_000);
        assert!((cost - 0.375).abs() < 1e-9);
    }

    #[test]
    fn cost_usd_is_zero_for_unknown_model() {
        let provider =
            OpenAICompatibleProvider::new(gemini_config("test-key"), "gemini", 1_000_000)
                .unwrap();
        assert_eq!(provider.cost_usd("unknown-model", 1000, 1000), 0.0);
    }

    #[test]
    fn message_conversion_maps_roles() {
        let api_msg = OpenAICompatibleProvider::convert_message(&AppMessage::system("sys"));
        assert_eq!(api_msg.role, "system");

        let api_msg = OpenAICompatibleProvider::convert_message(&AppMessage::user("hi"));
        assert_eq!(api_msg.role, "user");

        let api_msg = OpenAICompatibleProvider::convert_message(&AppMessage::tool_result(
            "call_1", "ok", false,
        ));
        assert_eq!(api_msg.role, "tool");
        assert_eq!(api_msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn build_request_includes_system_and_tools() {
        let provider =
            OpenAICompatibleProvider::new(gemini_config("test-key"), "gemini", 1_000_000)
                .unwrap();
        let request = CompletionRequest::new(
            "gemini-2.5-flash",
            "be helpful",
            vec![AppMessage::user("hello")],
        )
        .with_tools(vec![ToolSchema {
            name: "search".into(),
            description: "search things".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }]);

        let built = provider.build_request(&request, false);
        assert_eq!(built.messages.len(), 2);
        assert_eq!(built.messages[0].role, "system");
        assert_eq!(built.tools.len(), 1);
    }

    #[test]
    fn classify_status_distinguishes_retryable_from_hard() {
        assert!(
            OpenAICompatibleProvider::classify_status(StatusCode::TOO_MANY_REQUESTS, "")
                .is_failover_eligible()
        );
        assert!(
            OpenAICompatibleProvider::classify_status(StatusCode::SERVICE_UNAVAILABLE, "")
                .is_failover_eligible()
        );
        assert!(
            !OpenAICompatibleProvider::classify_status(StatusCode::UNAUTHORIZED, "bad key")
                .is_failover_eligible()
        );
    }
}
