//! OpenAI-dialect adapter
//!
//! Serves OpenAI itself plus every OpenAI-compatible endpoint (Azure,
//! Groq, Mistral, xAI, custom base URLs). Azure differs only in URL shape
//! and auth header; everything else shares the same wire format.

use async_stream::try_stream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

use super::adapter::{ChunkStream, ProviderAdapter};
use crate::config::{KeyConfig, ProviderConfig};
use crate::core::types::{
    ChatChoice, ChatDelta, ChatMessage, ChunkDelta, EmbeddingData, ExtraFields, GatewayRequest,
    GatewayResponse, GeneratedImage, MessageContent, MessageRole, ModelInfo, ProviderType,
    RequestInput, RequestKind, ResponsePayload, StreamChunk, TextChoice, ToolCall,
    ToolCallDelta, TranscriptionSegment, Usage,
};
use crate::utils::error::{GatewayError, Result};
use crate::utils::sse::{SseFrame, SseParser};

const AZURE_API_VERSION: &str = "2024-02-01";

/// Adapter for the OpenAI wire dialect
#[derive(Debug)]
pub struct OpenAIAdapter {
    provider: ProviderType,
    base_url: String,
    client: reqwest::Client,
    send_back_raw_response: bool,
}

impl OpenAIAdapter {
    /// Build an adapter for `provider` using its configured network policy
    pub fn new(provider: ProviderType, config: &ProviderConfig) -> Result<Self> {
        let base_url = match &config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => default_base_url(&provider)?,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &config.network.default_headers {
            let name: HeaderName = name.parse().map_err(|_| {
                GatewayError::Configuration(format!("invalid header name {name}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                GatewayError::Configuration(format!("invalid header value for {name:?}"))
            })?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.network.connect_timeout())
            .timeout(config.network.request_timeout())
            .default_headers(headers);
        if let Some(proxy) = &config.network.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| GatewayError::Configuration(format!("invalid proxy: {e}")))?,
            );
        }

        Ok(Self {
            provider,
            base_url,
            client: builder.build().map_err(GatewayError::from)?,
            send_back_raw_response: config.send_back_raw_response,
        })
    }

    fn url(&self, request: &GatewayRequest, key: &KeyConfig, path: &str) -> Result<String> {
        if self.provider == ProviderType::Azure {
            let endpoint = key
                .extra
                .azure_endpoint
                .as_deref()
                .map(|e| e.trim_end_matches('/'))
                .ok_or_else(|| {
                    GatewayError::Configuration("azure endpoint is not configured".into())
                })?;
            let deployment = key
                .extra
                .azure_deployments
                .get(&request.model)
                .map(String::as_str)
                .unwrap_or(&request.model);
            return Ok(format!(
                "{endpoint}/openai/deployments/{deployment}{path}?api-version={AZURE_API_VERSION}"
            ));
        }
        Ok(format!("{}{path}", self.base_url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder, key: &KeyConfig) -> reqwest::RequestBuilder {
        if self.provider == ProviderType::Azure {
            builder.header("api-key", &key.value)
        } else {
            builder.bearer_auth(&key.value)
        }
    }

    async fn post_json(
        &self,
        request: &GatewayRequest,
        key: &KeyConfig,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        let url = self.url(request, key, path)?;
        debug!(provider = %self.provider, %url, "provider request");
        let response = self
            .authorize(self.client.post(&url), key)
            .json(body)
            .send()
            .await?;
        read_json_response(response).await
    }

    fn chat_body(&self, request: &GatewayRequest, messages: &[ChatMessage], stream: bool) -> Result<Value> {
        let mut body = json!({
            "model": request.model,
            "messages": messages.iter().map(chat_message_to_wire).collect::<Vec<_>>(),
        });
        apply_params(&mut body, request)?;
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        Ok(body)
    }

    async fn chat(&self, request: &GatewayRequest, key: &KeyConfig, messages: &[ChatMessage]) -> Result<GatewayResponse> {
        let body = self.chat_body(request, messages, false)?;
        let started = Instant::now();
        let raw = self.post_json(request, key, "/chat/completions", &body).await?;
        let mut response = parse_chat_response(&raw, request)?;
        response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
        if self.send_back_raw_response {
            response.extra.raw_request = Some(body);
            response.extra.raw_response = Some(raw);
        }
        Ok(response)
    }

    async fn text(&self, request: &GatewayRequest, key: &KeyConfig, prompt: &str) -> Result<GatewayResponse> {
        let mut body = json!({"model": request.model, "prompt": prompt});
        apply_params(&mut body, request)?;
        let started = Instant::now();
        let raw = self.post_json(request, key, "/completions", &body).await?;
        let mut response = parse_text_response(&raw, request)?;
        response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
        if self.send_back_raw_response {
            response.extra.raw_request = Some(body);
            response.extra.raw_response = Some(raw);
        }
        Ok(response)
    }

    async fn embedding(&self, request: &GatewayRequest, key: &KeyConfig, input: &[String]) -> Result<GatewayResponse> {
        let body = json!({"model": request.model, "input": input});
        let started = Instant::now();
        let raw = self.post_json(request, key, "/embeddings", &body).await?;
        let data = raw["data"]
            .as_array()
            .ok_or_else(|| GatewayError::JsonParsing("embedding response missing data".into()))?
            .iter()
            .map(|item| {
                Ok(EmbeddingData {
                    index: item["index"].as_u64().unwrap_or(0) as u32,
                    embedding: item["embedding"]
                        .as_array()
                        .ok_or_else(|| {
                            GatewayError::JsonParsing("embedding item missing vector".into())
                        })?
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut response = base_response(&raw, request, ResponsePayload::Embedding { data });
        response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(response)
    }

    async fn speech(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse> {
        let RequestInput::Speech { input, voice, format } = &request.input else {
            return Err(GatewayError::Internal("speech payload mismatch".into()));
        };
        let mut body = json!({"model": request.model, "input": input, "voice": voice});
        if let Some(format) = format {
            body["response_format"] = json!(format);
        }
        let url = self.url(request, key, "/audio/speech")?;
        let started = Instant::now();
        let response = self
            .authorize(self.client.post(&url), key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(provider_error(status.as_u16(), &response.text().await.unwrap_or_default()));
        }
        let audio = response.bytes().await?.to_vec();
        let mut gateway_response = GatewayResponse {
            id: uuid::Uuid::new_v4().to_string(),
            created: chrono::Utc::now().timestamp(),
            model: request.model.clone(),
            payload: ResponsePayload::Speech { audio },
            usage: None,
            extra: ExtraFields::new(self.provider.clone(), &request.model, request.kind()),
        };
        gateway_response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(gateway_response)
    }

    async fn transcription(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse> {
        let RequestInput::Transcription { audio, format, language } = &request.input else {
            return Err(GatewayError::Internal("transcription payload mismatch".into()));
        };
        let file_name = format!("audio.{}", format.as_deref().unwrap_or("wav"));
        let mut form = reqwest::multipart::Form::new()
            .text("model", request.model.clone())
            .text("response_format", "verbose_json")
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.clone()).file_name(file_name),
            );
        if let Some(language) = language {
            form = form.text("language", language.clone());
        }
        let url = self.url(request, key, "/audio/transcriptions")?;
        let started = Instant::now();
        let response = self
            .authorize(self.client.post(&url), key)
            .multipart(form)
            .send()
            .await?;
        let raw = read_json_response(response).await?;
        let segments = raw["segments"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, seg)| TranscriptionSegment {
                        index: i as u32,
                        text: seg["text"].as_str().unwrap_or_default().to_string(),
                        start: seg["start"].as_f64(),
                        end: seg["end"].as_f64(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let payload = ResponsePayload::Transcription {
            text: raw["text"].as_str().unwrap_or_default().to_string(),
            segments,
        };
        let mut gateway_response = base_response(&raw, request, payload);
        gateway_response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(gateway_response)
    }

    async fn image(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse> {
        let RequestInput::ImageGeneration { prompt, n, size } = &request.input else {
            return Err(GatewayError::Internal("image payload mismatch".into()));
        };
        let mut body = json!({
            "model": request.model,
            "prompt": prompt,
            "response_format": "b64_json",
        });
        if let Some(n) = n {
            body["n"] = json!(n);
        }
        if let Some(size) = size {
            body["size"] = json!(size);
        }
        let started = Instant::now();
        let raw = self.post_json(request, key, "/images/generations", &body).await?;
        let images = raw["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| GeneratedImage {
                        image_index: i as u32,
                        b64_json: item["b64_json"].as_str().map(str::to_string),
                        url: item["url"].as_str().map(str::to_string),
                        revised_prompt: item["revised_prompt"].as_str().map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut response = base_response(&raw, request, ResponsePayload::Image { images });
        response.extra.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(response)
    }

    async fn list_models(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse> {
        // Azure model availability is deployment-driven; the deployment map
        // on the key is authoritative, not the service's models endpoint.
        let models: Vec<ModelInfo> = if self.provider == ProviderType::Azure {
            key.extra
                .azure_deployments
                .keys()
                .map(|model| ModelInfo {
                    id: model.clone(),
                    provider: self.provider.clone(),
                    context_window: None,
                })
                .collect()
        } else {
            let url = self.url(request, key, "/models")?;
            let response = self.authorize(self.client.get(&url), key).send().await?;
            let raw = read_json_response(response).await?;
            raw["data"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item["id"].as_str())
                        .map(|id| ModelInfo {
                            id: id.to_string(),
                            provider: self.provider.clone(),
                            context_window: None,
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(GatewayResponse {
            id: uuid::Uuid::new_v4().to_string(),
            created: chrono::Utc::now().timestamp(),
            model: request.model.clone(),
            payload: ResponsePayload::ModelList { models },
            usage: None,
            extra: ExtraFields::new(self.provider.clone(), &request.model, request.kind()),
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider.clone()
    }

    fn supported_kinds(&self) -> &[RequestKind] {
        &[
            RequestKind::TextCompletion,
            RequestKind::Chat,
            RequestKind::Responses,
            RequestKind::Embedding,
            RequestKind::Speech,
            RequestKind::Transcription,
            RequestKind::ImageGeneration,
            RequestKind::ListModels,
        ]
    }

    async fn execute(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse> {
        self.check_supported(request.kind())?;
        match &request.input {
            RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => {
                self.chat(request, key, messages).await
            }
            RequestInput::Text { prompt } => self.text(request, key, prompt).await,
            RequestInput::Embedding { input } => self.embedding(request, key, input).await,
            RequestInput::Speech { .. } => self.speech(request, key).await,
            RequestInput::Transcription { .. } => self.transcription(request, key).await,
            RequestInput::ImageGeneration { .. } => self.image(request, key).await,
            RequestInput::ListModels => self.list_models(request, key).await,
            RequestInput::Rerank { .. } => Err(GatewayError::UnsupportedOperation {
                provider: self.provider.to_string(),
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
        let kind = request.kind();
        let (path, body) = match &request.input {
            RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => (
                "/chat/completions",
                self.chat_body(request, messages, true)?,
            ),
            RequestInput::Text { prompt } => {
                let mut body = json!({"model": request.model, "prompt": prompt, "stream": true});
                apply_params(&mut body, request)?;
                ("/completions", body)
            }
            _ => {
                return Err(GatewayError::UnsupportedOperation {
                    provider: self.provider.to_string(),
                    operation: format!("{kind} stream"),
                })
            }
        };

        let url = self.url(request, key, path)?;
        let response = self
            .authorize(self.client.post(&url), key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(provider_error(status.as_u16(), &response.text().await.unwrap_or_default()));
        }

        let request_id = request.context.request_id().to_string();
        let model = request.model.clone();
        let bytes = response.bytes_stream();

        let stream = try_stream! {
            tokio::pin!(bytes);
            let mut parser = SseParser::new();
            let mut chunk_index: u64 = 0;
            let mut finished = false;
            let mut pending_usage: Option<Usage> = None;

            'outer: while let Some(piece) = bytes.next().await {
                let piece = piece.map_err(GatewayError::from)?;
                for frame in parser.feed(&piece) {
                    match frame {
                        SseFrame::Done => break 'outer,
                        SseFrame::Data(data) => {
                            let raw: Value = serde_json::from_str(&data)
                                .map_err(|e| GatewayError::JsonParsing(e.to_string()))?;
                            if let Some(chunk) = parse_stream_frame(
                                &raw,
                                &request_id,
                                &model,
                                kind,
                                &mut chunk_index,
                                &mut pending_usage,
                            ) {
                                finished = finished || chunk.is_final();
                                yield chunk;
                                if finished {
                                    break 'outer;
                                }
                            }
                        }
                    }
                }
            }

            if !finished {
                // Idle close without a finish reason: synthesise the terminal marker
                let mut done = StreamChunk::delta(&request_id, &model, chunk_index, ChunkDelta::Done);
                done.usage = pending_usage.take();
                yield done;
            }
        };
        Ok(Box::pin(stream))
    }
}

fn default_base_url(provider: &ProviderType) -> Result<String> {
    let url = match provider {
        ProviderType::OpenAI => "https://api.openai.com/v1",
        ProviderType::Groq => "https://api.groq.com/openai/v1",
        ProviderType::Mistral => "https://api.mistral.ai/v1",
        ProviderType::XAI => "https://api.x.ai/v1",
        ProviderType::Azure => "", // URL built per request from key extras
        other => {
            return Err(GatewayError::Configuration(format!(
                "provider {other} requires an explicit base_url"
            )))
        }
    };
    Ok(url.to_string())
}

fn chat_message_to_wire(message: &ChatMessage) -> Value {
    let mut wire = json!({"role": message.role.to_string()});
    match &message.content {
        MessageContent::Text(text) => wire["content"] = json!(text),
        MessageContent::Parts(parts) => {
            wire["content"] = Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        crate::core::types::ContentPart::Text { text } => {
                            json!({"type": "text", "text": text})
                        }
                        crate::core::types::ContentPart::ImageUrl { url } => {
                            json!({"type": "image_url", "image_url": {"url": url}})
                        }
                    })
                    .collect(),
            )
        }
    }
    if let Some(name) = &message.name {
        wire["name"] = json!(name);
    }
    if let Some(tool_calls) = &message.tool_calls {
        wire["tool_calls"] = serde_json::to_value(tool_calls).unwrap_or(Value::Null);
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }
    wire
}

fn apply_params(body: &mut Value, request: &GatewayRequest) -> Result<()> {
    let params = &request.params;
    if let Some(v) = params.temperature {
        body["temperature"] = json!(v);
    }
    if let Some(v) = params.top_p {
        body["top_p"] = json!(v);
    }
    if let Some(v) = params.max_tokens {
        body["max_tokens"] = json!(v);
    }
    if let Some(v) = &params.stop {
        body["stop"] = json!(v);
    }
    if let Some(v) = params.presence_penalty {
        body["presence_penalty"] = json!(v);
    }
    if let Some(v) = params.frequency_penalty {
        body["frequency_penalty"] = json!(v);
    }
    if let Some(tools) = &params.tools {
        body["tools"] = serde_json::to_value(tools)?;
    }
    if let Some(choice) = &params.tool_choice {
        body["tool_choice"] = serde_json::to_value(choice)?;
    }
    if let Some(user) = &params.user {
        body["user"] = json!(user);
    }
    for (key, value) in &params.extras {
        body[key.as_str()] = value.clone();
    }
    Ok(())
}

async fn read_json_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(provider_error(status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|e| GatewayError::JsonParsing(e.to_string()))
}

fn provider_error(status: u16, body: &str) -> GatewayError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().map(|v| &v["error"]);
    GatewayError::ProviderAPI {
        status,
        error_type: error
            .and_then(|e| e["type"].as_str())
            .map(str::to_string),
        error_code: error
            .and_then(|e| e["code"].as_str())
            .map(str::to_string),
        message: error
            .and_then(|e| e["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.chars().take(500).collect()),
    }
}

fn parse_usage(raw: &Value) -> Option<Usage> {
    let usage = raw.get("usage")?;
    if usage.is_null() {
        return None;
    }
    Some(Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
    })
}

fn parse_wire_message(raw: &Value) -> ChatMessage {
    let role = match raw["role"].as_str() {
        Some("system") => MessageRole::System,
        Some("user") => MessageRole::User,
        Some("tool") => MessageRole::Tool,
        _ => MessageRole::Assistant,
    };
    let tool_calls = raw["tool_calls"].as_array().map(|calls| {
        calls
            .iter()
            .map(|call| ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                call_type: call["type"].as_str().unwrap_or("function").to_string(),
                function: crate::core::types::FunctionCall {
                    name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: call["function"]["arguments"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                },
            })
            .collect::<Vec<_>>()
    });
    ChatMessage {
        role,
        content: MessageContent::Text(raw["content"].as_str().unwrap_or_default().to_string()),
        name: None,
        tool_calls,
        tool_call_id: None,
    }
}

fn base_response(raw: &Value, request: &GatewayRequest, payload: ResponsePayload) -> GatewayResponse {
    GatewayResponse {
        id: raw["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        created: raw["created"]
            .as_i64()
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: raw["model"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| request.model.clone()),
        payload,
        usage: parse_usage(raw),
        extra: ExtraFields::new(request.provider.clone(), &request.model, request.kind()),
    }
}

fn parse_chat_response(raw: &Value, request: &GatewayRequest) -> Result<GatewayResponse> {
    let choices = raw["choices"]
        .as_array()
        .ok_or_else(|| GatewayError::JsonParsing("chat response missing choices".into()))?
        .iter()
        .map(|choice| ChatChoice {
            index: choice["index"].as_u64().unwrap_or(0) as u32,
            message: parse_wire_message(&choice["message"]),
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        })
        .collect::<Vec<_>>();
    let payload = if request.kind() == RequestKind::Responses {
        ResponsePayload::Responses { output: choices }
    } else {
        ResponsePayload::Chat { choices }
    };
    Ok(base_response(raw, request, payload))
}

fn parse_text_response(raw: &Value, request: &GatewayRequest) -> Result<GatewayResponse> {
    let choices = raw["choices"]
        .as_array()
        .ok_or_else(|| GatewayError::JsonParsing("text response missing choices".into()))?
        .iter()
        .map(|choice| TextChoice {
            index: choice["index"].as_u64().unwrap_or(0) as u32,
            text: choice["text"].as_str().unwrap_or_default().to_string(),
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        })
        .collect();
    Ok(base_response(raw, request, ResponsePayload::Text { choices }))
}

/// Translate one SSE frame into a canonical chunk.
///
/// Usage-only frames (stream_options include_usage) carry no choices; the
/// usage is held back and attached to the terminal chunk.
fn parse_stream_frame(
    raw: &Value,
    request_id: &str,
    model: &str,
    kind: RequestKind,
    chunk_index: &mut u64,
    pending_usage: &mut Option<Usage>,
) -> Option<StreamChunk> {
    if let Some(usage) = parse_usage(raw) {
        *pending_usage = Some(usage);
    }

    let choices = raw["choices"].as_array()?;
    let choice = match choices.first() {
        Some(choice) => choice,
        None => return None, // usage-only frame
    };

    let finish_reason = choice["finish_reason"].as_str().map(str::to_string);
    let delta = match kind {
        RequestKind::TextCompletion => ChunkDelta::Text {
            text: choice["text"].as_str().unwrap_or_default().to_string(),
        },
        _ => {
            let wire = &choice["delta"];
            let tool_calls = wire["tool_calls"]
                .as_array()
                .map(|calls| {
                    calls
                        .iter()
                        .map(|call| ToolCallDelta {
                            index: call["index"].as_u64().unwrap_or(0) as u32,
                            id: call["id"].as_str().map(str::to_string),
                            call_type: call["type"].as_str().map(str::to_string),
                            name: call["function"]["name"].as_str().map(str::to_string),
                            arguments: call["function"]["arguments"].as_str().map(str::to_string),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            ChunkDelta::Chat(ChatDelta {
                role: match wire["role"].as_str() {
                    Some("assistant") => Some(MessageRole::Assistant),
                    Some("user") => Some(MessageRole::User),
                    Some("system") => Some(MessageRole::System),
                    Some("tool") => Some(MessageRole::Tool),
                    _ => None,
                },
                content: wire["content"].as_str().map(str::to_string),
                reasoning: wire["reasoning"].as_str().map(str::to_string),
                refusal: wire["refusal"].as_str().map(str::to_string),
                reasoning_details: Vec::new(),
                tool_calls,
                audio: None,
            })
        }
    };

    let mut chunk = StreamChunk::delta(request_id, model, *chunk_index, delta);
    *chunk_index += 1;
    chunk.finish_reason = finish_reason;
    if chunk.is_final() {
        chunk.usage = pending_usage.take().or_else(|| parse_usage(raw));
    }
    Some(chunk)
}
