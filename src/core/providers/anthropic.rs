//! Anthropic adapter
//!
//! Speaks the native messages API: system prompt extracted from the
//! conversation, content blocks on both sides, `input_tokens` /
//! `output_tokens` usage, and event-typed SSE for streaming.

use async_stream::try_stream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Instant;

use super::adapter::{ChunkStream, ProviderAdapter};
use crate::config::{KeyConfig, ProviderConfig};
use crate::core::types::{
    ChatChoice, ChatDelta, ChatMessage, ChunkDelta, ExtraFields, FunctionCall, GatewayRequest,
    GatewayResponse, MessageContent, MessageRole, ModelInfo, ProviderType, RequestInput,
    RequestKind, ResponsePayload, StreamChunk, ToolCall, ToolCallDelta, Usage,
};
use crate::utils::error::{GatewayError, Result};
use crate::utils::sse::{SseFrame, SseParser};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for the Anthropic wire dialect
#[derive(Debug)]
pub struct AnthropicAdapter {
    base_url: String,
    client: reqwest::Client,
    send_back_raw_response: bool,
}

impl AnthropicAdapter {
    /// Build an adapter using the provider's configured network policy
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(config.network.connect_timeout())
            .timeout(config.network.request_timeout())
            .build()
            .map_err(GatewayError::from)?;
        Ok(Self {
            base_url,
            client,
            send_back_raw_response: config.send_back_raw_response,
        })
    }

    fn request_builder(&self, path: &str, key: &KeyConfig) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", &key.value)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn messages_body(&self, request: &GatewayRequest, messages: &[ChatMessage], stream: bool) -> Result<Value> {
        let (system, turns) = split_system(messages);
        let mut body = json!({
            "model": request.model,
            "messages": turns.iter().map(|m| message_to_wire(m)).collect::<Vec<_>>(),
            "max_tokens": request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(v) = request.params.temperature {
            body["temperature"] = json!(v);
        }
        if let Some(v) = request.params.top_p {
            body["top_p"] = json!(v);
        }
        if let Some(v) = request.params.top_k {
            body["top_k"] = json!(v);
        }
        if let Some(stop) = &request.params.stop {
            body["stop_sequences"] = json!(stop);
        }
        if let Some(tools) = &request.params.tools {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.function.name,
                            "description": tool.function.description,
                            "input_schema": tool.function.parameters.clone().unwrap_or(json!({"type": "object"})),
                        })
                    })
                    .collect(),
            );
        }
        for (key, value) in &request.params.extras {
            body[key.as_str()] = value.clone();
        }
        if stream {
            body["stream"] = json!(true);
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn supported_kinds(&self) -> &[RequestKind] {
        &[RequestKind::Chat, RequestKind::Responses, RequestKind::ListModels]
    }

    async fn execute(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse> {
        self.check_supported(request.kind())?;
        match &request.input {
            RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => {
                let body = self.messages_body(request, messages, false)?;
                let started = Instant::now();
                let response = self
                    .request_builder("/v1/messages", key)
                    .json(&body)
                    .send()
                    .await?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    return Err(native_error(status.as_u16(), &text));
                }
                let raw: Value = serde_json::from_str(&text)
                    .map_err(|e| GatewayError::JsonParsing(e.to_string()))?;
                let mut gateway_response = parse_message_response(&raw, request)?;
                gateway_response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
                if self.send_back_raw_response {
                    gateway_response.extra.raw_request = Some(body);
                    gateway_response.extra.raw_response = Some(raw);
                }
                Ok(gateway_response)
            }
            RequestInput::ListModels => {
                let response = self
                    .client
                    .get(format!("{}/v1/models", self.base_url))
                    .header("x-api-key", &key.value)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .send()
                    .await?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    return Err(native_error(status.as_u16(), &text));
                }
                let raw: Value = serde_json::from_str(&text)
                    .map_err(|e| GatewayError::JsonParsing(e.to_string()))?;
                let models = raw["data"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item["id"].as_str())
                            .map(|id| ModelInfo {
                                id: id.to_string(),
                                provider: ProviderType::Anthropic,
                                context_window: None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(GatewayResponse {
                    id: uuid::Uuid::new_v4().to_string(),
                    created: chrono::Utc::now().timestamp(),
                    model: request.model.clone(),
                    payload: ResponsePayload::ModelList { models },
                    usage: None,
                    extra: ExtraFields::new(ProviderType::Anthropic, &request.model, request.kind()),
                })
            }
            _ => Err(GatewayError::UnsupportedOperation {
                provider: "anthropic".into(),
                operation: request.kind().to_string(),
            }),
        }
    }

    async fn execute_stream(
        &self,
        request: &GatewayRequest,
        key: &KeyConfig,
    ) -> Result<ChunkStream> {
        self.check_supported(request.kind())?;
        let messages = request.input.messages().ok_or_else(|| {
            GatewayError::UnsupportedOperation {
                provider: "anthropic".into(),
                operation: format!("{} stream", request.kind()),
            }
        })?;
        let body = self.messages_body(request, messages, true)?;
        let response = self
            .request_builder("/v1/messages", key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(native_error(status.as_u16(), &response.text().await.unwrap_or_default()));
        }

        let request_id = request.context.request_id().to_string();
        let model = request.model.clone();
        let bytes = response.bytes_stream();

        let stream = try_stream! {
            tokio::pin!(bytes);
            let mut parser = SseParser::new();
            let mut state = StreamState::default();
            let mut finished = false;

            'outer: while let Some(piece) = bytes.next().await {
                let piece = piece.map_err(GatewayError::from)?;
                for frame in parser.feed(&piece) {
                    let SseFrame::Data(data) = frame else { break 'outer };
                    let raw: Value = serde_json::from_str(&data)
                        .map_err(|e| GatewayError::JsonParsing(e.to_string()))?;
                    if let Some(chunk) = state.translate_event(&raw, &request_id, &model)? {
                        finished = finished || chunk.is_final();
                        yield chunk;
                        if finished {
                            break 'outer;
                        }
                    }
                }
            }

            if !finished {
                yield StreamChunk::delta(&request_id, &model, state.next_index(), ChunkDelta::Done);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Mutable cursor over one Anthropic event stream
#[derive(Default)]
struct StreamState {
    chunk_index: u64,
    prompt_tokens: u32,
    completion_tokens: u32,
    // content-block index -> tool-call slot, assigned in arrival order
    tool_slots: Vec<(u64, u32)>,
}

impl StreamState {
    fn next_index(&mut self) -> u64 {
        let index = self.chunk_index;
        self.chunk_index += 1;
        index
    }

    fn tool_slot(&mut self, block_index: u64) -> u32 {
        if let Some((_, slot)) = self.tool_slots.iter().find(|(b, _)| *b == block_index) {
            return *slot;
        }
        let slot = self.tool_slots.len() as u32;
        self.tool_slots.push((block_index, slot));
        slot
    }

    fn translate_event(
        &mut self,
        raw: &Value,
        request_id: &str,
        model: &str,
    ) -> Result<Option<StreamChunk>> {
        let event = raw["type"].as_str().unwrap_or_default();
        match event {
            "message_start" => {
                self.prompt_tokens =
                    raw["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
                let chunk = StreamChunk::delta(
                    request_id,
                    model,
                    self.next_index(),
                    ChunkDelta::Chat(ChatDelta {
                        role: Some(MessageRole::Assistant),
                        ..Default::default()
                    }),
                );
                Ok(Some(chunk))
            }
            "content_block_start" => {
                let block = &raw["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let block_index = raw["index"].as_u64().unwrap_or(0);
                    let slot = self.tool_slot(block_index);
                    let chunk = StreamChunk::delta(
                        request_id,
                        model,
                        self.next_index(),
                        ChunkDelta::Chat(ChatDelta {
                            tool_calls: vec![ToolCallDelta {
                                index: slot,
                                id: block["id"].as_str().map(str::to_string),
                                call_type: Some("function".to_string()),
                                name: block["name"].as_str().map(str::to_string),
                                arguments: None,
                            }],
                            ..Default::default()
                        }),
                    );
                    return Ok(Some(chunk));
                }
                Ok(None)
            }
            "content_block_delta" => {
                let delta = &raw["delta"];
                let chunk_delta = match delta["type"].as_str() {
                    Some("text_delta") => ChatDelta {
                        content: delta["text"].as_str().map(str::to_string),
                        ..Default::default()
                    },
                    Some("thinking_delta") => ChatDelta {
                        reasoning: delta["thinking"].as_str().map(str::to_string),
                        ..Default::default()
                    },
                    Some("input_json_delta") => {
                        let block_index = raw["index"].as_u64().unwrap_or(0);
                        let slot = self.tool_slot(block_index);
                        ChatDelta {
                            tool_calls: vec![ToolCallDelta {
                                index: slot,
                                arguments: delta["partial_json"].as_str().map(str::to_string),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }
                    }
                    _ => return Ok(None),
                };
                Ok(Some(StreamChunk::delta(
                    request_id,
                    model,
                    self.next_index(),
                    ChunkDelta::Chat(chunk_delta),
                )))
            }
            "message_delta" => {
                self.completion_tokens =
                    raw["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                let stop_reason = raw["delta"]["stop_reason"].as_str();
                match stop_reason {
                    Some(reason) => {
                        let mut chunk = StreamChunk::delta(
                            request_id,
                            model,
                            self.next_index(),
                            ChunkDelta::Chat(ChatDelta::default()),
                        );
                        chunk.finish_reason = Some(map_stop_reason(reason));
                        chunk.usage =
                            Some(Usage::new(self.prompt_tokens, self.completion_tokens));
                        Ok(Some(chunk))
                    }
                    None => Ok(None),
                }
            }
            // message_stop arrives after the finish reason; ping is keepalive
            "message_stop" | "ping" | "content_block_stop" => Ok(None),
            "error" => Err(GatewayError::ProviderAPI {
                status: 500,
                error_type: raw["error"]["type"].as_str().map(str::to_string),
                error_code: None,
                message: raw["error"]["message"]
                    .as_str()
                    .unwrap_or("stream error")
                    .to_string(),
            }),
            _ => Ok(None),
        }
    }
}

fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system_parts = Vec::new();
    let mut turns = Vec::new();
    for message in messages {
        if message.role == MessageRole::System {
            system_parts.push(message.content.as_text());
        } else {
            turns.push(message);
        }
    }
    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n"));
    (system, turns)
}

fn message_to_wire(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        _ => "user",
    };
    // Tool results travel as tool_result blocks inside a user turn
    if message.role == MessageRole::Tool {
        return json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content.as_text(),
            }],
        });
    }
    let mut blocks = Vec::new();
    let text = message.content.as_text();
    if !text.is_empty() {
        blocks.push(json!({"type": "text", "text": text}));
    }
    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let input: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(json!({}));
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.function.name,
                "input": input,
            }));
        }
    }
    json!({"role": role, "content": blocks})
}

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

fn parse_message_response(raw: &Value, request: &GatewayRequest) -> Result<GatewayResponse> {
    let blocks = raw["content"]
        .as_array()
        .ok_or_else(|| GatewayError::JsonParsing("message response missing content".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].to_string(),
                },
            }),
            _ => {}
        }
    }

    let usage = Usage::new(
        raw["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        raw["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    );
    let finish_reason = raw["stop_reason"].as_str().map(map_stop_reason);
    let choices = vec![ChatChoice {
        index: 0,
        message: ChatMessage {
            role: MessageRole::Assistant,
            content: MessageContent::Text(text),
            name: None,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        },
        finish_reason,
    }];
    let payload = if request.kind() == RequestKind::Responses {
        ResponsePayload::Responses { output: choices }
    } else {
        ResponsePayload::Chat { choices }
    };
    Ok(GatewayResponse {
        id: raw["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        created: chrono::Utc::now().timestamp(),
        model: raw["model"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| request.model.clone()),
        payload,
        usage: Some(usage),
        extra: ExtraFields::new(ProviderType::Anthropic, &request.model, request.kind()),
    })
}

fn native_error(status: u16, body: &str) -> GatewayError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().map(|v| &v["error"]);
    GatewayError::ProviderAPI {
        status,
        error_type: error.and_then(|e| e["type"].as_str()).map(str::to_string),
        error_code: None,
        message: error
            .and_then(|e| e["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.chars().take(500).collect()),
    }
}
