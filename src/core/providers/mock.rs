//! Rule-driven mock adapter
//!
//! Matches requests against an ordered rule list and replays canned
//! responses, streams, errors or latency. Rules count their hits; the
//! totals let tests assert how often a path was taken (e.g. that a
//! direct-only cache never reached the provider).

use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_stream::try_stream;
use parking_lot::Mutex;

use super::adapter::{ChunkStream, ProviderAdapter};
use crate::config::KeyConfig;
use crate::core::types::{
    ChatChoice, ChatMessage, ChunkDelta, EmbeddingData, ExtraFields, GatewayRequest,
    GatewayResponse, MessageContent, MessageRole, ModelInfo, ProviderType, RequestInput,
    RequestKind, RerankResult, ResponsePayload, StreamChunk, TextChoice, Usage,
};
use crate::utils::error::{GatewayError, Result};

/// What a matched rule does
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Reply with a canned unary chat/text response
    Respond {
        /// Response content
        content: String,
        /// Finish reason
        finish_reason: String,
        /// Usage to report
        usage: Option<Usage>,
    },
    /// Reply with a canned stream
    Stream {
        /// Delta payloads emitted in order
        deltas: Vec<ChunkDelta>,
        /// Finish reason on the terminal chunk
        finish_reason: String,
        /// Usage on the terminal chunk
        usage: Option<Usage>,
    },
    /// Fail with the given error
    Fail(GatewayError),
    /// Fail `times` times, then fall through to the next matching rule
    FailTimes {
        /// Failures before the rule stops matching
        times: u64,
        /// Error to fail with
        error: GatewayError,
    },
}

/// Request matcher for one rule; unset fields match anything
#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    /// Required model id
    pub model: Option<String>,
    /// Required request kind
    pub kind: Option<RequestKind>,
    /// Substring required in the flattened input text
    pub content_contains: Option<String>,
}

impl RuleMatcher {
    fn matches(&self, request: &GatewayRequest) -> bool {
        if let Some(model) = &self.model {
            if &request.model != model {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if request.kind() != kind {
                return false;
            }
        }
        if let Some(needle) = &self.content_contains {
            if !flatten_input(&request.input).contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One mock rule
#[derive(Debug)]
pub struct MockRule {
    /// Rule name, keys the hit map
    pub name: String,
    /// When the rule applies
    pub matcher: RuleMatcher,
    /// What it does
    pub action: RuleAction,
    /// Artificial delay before acting
    pub latency: Option<Duration>,
    hits: AtomicU64,
}

impl MockRule {
    /// Build a rule
    pub fn new(name: impl Into<String>, matcher: RuleMatcher, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            matcher,
            action,
            latency: None,
            hits: AtomicU64::new(0),
        }
    }

    /// Add an artificial latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Times this rule has fired
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// The mock adapter
#[derive(Debug)]
pub struct MockAdapter {
    provider: ProviderType,
    rules: Vec<MockRule>,
    total_requests: AtomicU64,
    rule_hits: Mutex<AHashMap<String, u64>>,
    default_latency: Option<Duration>,
}

impl MockAdapter {
    /// Mock adapter registered under its own provider type
    pub fn new(rules: Vec<MockRule>) -> Self {
        Self::masquerading(ProviderType::Mock, rules)
    }

    /// Mock adapter masquerading as another provider, for lifecycle tests
    pub fn masquerading(provider: ProviderType, rules: Vec<MockRule>) -> Self {
        Self {
            provider,
            rules,
            total_requests: AtomicU64::new(0),
            rule_hits: Mutex::new(AHashMap::new()),
            default_latency: None,
        }
    }

    /// Delay applied when no rule specifies one
    pub fn with_default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = Some(latency);
        self
    }

    /// Total requests seen
    pub fn request_count(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Hits for a named rule
    pub fn rule_hit_count(&self, name: &str) -> u64 {
        *self.rule_hits.lock().get(name).unwrap_or(&0)
    }

    fn record_hit(&self, rule: &MockRule) {
        rule.hits.fetch_add(1, Ordering::Relaxed);
        *self.rule_hits.lock().entry(rule.name.clone()).or_insert(0) += 1;
    }

    /// First matching, still-armed rule
    fn select_rule(&self, request: &GatewayRequest) -> Option<&MockRule> {
        self.rules.iter().find(|rule| {
            if !rule.matcher.matches(request) {
                return false;
            }
            if let RuleAction::FailTimes { times, .. } = &rule.action {
                // Exhausted fail-rules stop matching so later rules serve
                if rule.hit_count() >= *times {
                    return false;
                }
            }
            true
        })
    }

    async fn apply_latency(&self, rule: Option<&MockRule>) {
        let latency = rule.and_then(|r| r.latency).or(self.default_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn canned_response(&self, request: &GatewayRequest, content: &str, finish_reason: &str, usage: Option<Usage>) -> GatewayResponse {
        let payload = match request.kind() {
            RequestKind::TextCompletion => ResponsePayload::Text {
                choices: vec![TextChoice {
                    index: 0,
                    text: content.to_string(),
                    finish_reason: Some(finish_reason.to_string()),
                }],
            },
            RequestKind::Embedding => {
                let RequestInput::Embedding { input } = &request.input else {
                    unreachable!("embedding kind carries embedding input")
                };
                ResponsePayload::Embedding {
                    data: input
                        .iter()
                        .enumerate()
                        .map(|(i, text)| EmbeddingData {
                            index: i as u32,
                            embedding: deterministic_embedding(text),
                        })
                        .collect(),
                }
            }
            RequestKind::Rerank => {
                let RequestInput::Rerank { documents, .. } = &request.input else {
                    unreachable!("rerank kind carries rerank input")
                };
                ResponsePayload::Rerank {
                    results: documents
                        .iter()
                        .enumerate()
                        .map(|(i, _)| RerankResult {
                            index: i as u32,
                            relevance_score: 1.0 / (i + 1) as f64,
                        })
                        .collect(),
                }
            }
            RequestKind::Speech => ResponsePayload::Speech {
                audio: content.as_bytes().to_vec(),
            },
            RequestKind::Transcription => ResponsePayload::Transcription {
                text: content.to_string(),
                segments: Vec::new(),
            },
            RequestKind::ImageGeneration => ResponsePayload::Image {
                images: vec![crate::core::types::GeneratedImage {
                    image_index: 0,
                    b64_json: Some(content.to_string()),
                    url: None,
                    revised_prompt: None,
                }],
            },
            RequestKind::ListModels => ResponsePayload::ModelList {
                models: vec![ModelInfo {
                    id: request.model.clone(),
                    provider: self.provider.clone(),
                    context_window: None,
                }],
            },
            _ => ResponsePayload::Chat {
                choices: vec![ChatChoice {
                    index: 0,
                    message: ChatMessage {
                        role: MessageRole::Assistant,
                        content: MessageContent::Text(content.to_string()),
                        name: None,
                        tool_calls: None,
                        tool_call_id: None,
                    },
                    finish_reason: Some(finish_reason.to_string()),
                }],
            },
        };
        GatewayResponse {
            id: format!("mock-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: request.model.clone(),
            payload,
            usage: usage.or_else(|| Some(Usage::new(8, 4))),
            extra: ExtraFields::new(self.provider.clone(), &request.model, request.kind()),
        }
    }
}

fn flatten_input(input: &RequestInput) -> String {
    match input {
        RequestInput::Text { prompt } => prompt.clone(),
        RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => messages
            .iter()
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n"),
        RequestInput::Embedding { input } => input.join("\n"),
        RequestInput::Rerank { query, .. } => query.clone(),
        RequestInput::Speech { input, .. } => input.clone(),
        RequestInput::ImageGeneration { prompt, .. } => prompt.clone(),
        _ => String::new(),
    }
}

/// Stable pseudo-embedding derived from the text bytes
pub fn deterministic_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 8];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % 8] += byte as f32 / 255.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait::async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider.clone()
    }

    fn supported_kinds(&self) -> &[RequestKind] {
        &[
            RequestKind::TextCompletion,
            RequestKind::Chat,
            RequestKind::Responses,
            RequestKind::Embedding,
            RequestKind::Rerank,
            RequestKind::Speech,
            RequestKind::Transcription,
            RequestKind::ImageGeneration,
            RequestKind::ListModels,
        ]
    }

    async fn execute(&self, request: &GatewayRequest, _key: &KeyConfig) -> Result<GatewayResponse> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let rule = self.select_rule(request);
        self.apply_latency(rule).await;

        let Some(rule) = rule else {
            return Ok(self.canned_response(request, "mock response", "stop", None));
        };
        self.record_hit(rule);
        match &rule.action {
            RuleAction::Respond {
                content,
                finish_reason,
                usage,
            } => Ok(self.canned_response(request, content, finish_reason, usage.clone())),
            RuleAction::Fail(error) => Err(error.clone()),
            RuleAction::FailTimes { error, .. } => Err(error.clone()),
            RuleAction::Stream { .. } => Err(GatewayError::Validation(
                "stream rule matched a unary request".into(),
            )),
        }
    }

    async fn execute_stream(
        &self,
        request: &GatewayRequest,
        _key: &KeyConfig,
    ) -> Result<ChunkStream> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let rule = self.select_rule(request);
        self.apply_latency(rule).await;

        let request_id = request.context.request_id().to_string();
        let model = request.model.clone();

        let (deltas, finish_reason, usage) = match rule {
            Some(rule) => {
                self.record_hit(rule);
                match &rule.action {
                    RuleAction::Stream {
                        deltas,
                        finish_reason,
                        usage,
                    } => (deltas.clone(), finish_reason.clone(), usage.clone()),
                    RuleAction::Fail(error) | RuleAction::FailTimes { error, .. } => {
                        return Err(error.clone())
                    }
                    RuleAction::Respond {
                        content,
                        finish_reason,
                        usage,
                    } => (
                        vec![ChunkDelta::Chat(crate::core::types::ChatDelta {
                            role: Some(MessageRole::Assistant),
                            content: Some(content.clone()),
                            ..Default::default()
                        })],
                        finish_reason.clone(),
                        usage.clone(),
                    ),
                }
            }
            None => (
                vec![ChunkDelta::Chat(crate::core::types::ChatDelta {
                    role: Some(MessageRole::Assistant),
                    content: Some("mock response".to_string()),
                    ..Default::default()
                })],
                "stop".to_string(),
                None,
            ),
        };

        let stream = try_stream! {
            let mut index: u64 = 0;
            for delta in deltas {
                yield StreamChunk::delta(&request_id, &model, index, delta);
                index += 1;
            }
            let mut terminal = StreamChunk::delta(&request_id, &model, index, ChunkDelta::Chat(Default::default()));
            terminal.finish_reason = Some(finish_reason);
            terminal.usage = usage.or_else(|| Some(Usage::new(8, 4)));
            yield terminal;
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn key() -> KeyConfig {
        KeyConfig {
            id: "mock".into(),
            value: "mock".into(),
            supported_models: vec![],
            weight: 1.0,
            extra: Default::default(),
        }
    }

    fn chat(content: &str) -> GatewayRequest {
        GatewayRequest::new(
            ProviderType::Mock,
            "mock-model",
            RequestInput::Chat {
                messages: vec![ChatMessage::text(MessageRole::User, content)],
            },
        )
    }

    #[tokio::test]
    async fn test_rule_matching_and_hit_counts() {
        let adapter = MockAdapter::new(vec![MockRule::new(
            "greeting",
            RuleMatcher {
                content_contains: Some("hello".into()),
                ..Default::default()
            },
            RuleAction::Respond {
                content: "hi there".into(),
                finish_reason: "stop".into(),
                usage: None,
            },
        )]);

        let matched = adapter.execute(&chat("hello world"), &key()).await.unwrap();
        assert_eq!(matched.content_text().as_deref(), Some("hi there"));
        assert_eq!(adapter.rule_hit_count("greeting"), 1);

        let unmatched = adapter.execute(&chat("goodbye"), &key()).await.unwrap();
        assert_eq!(unmatched.content_text().as_deref(), Some("mock response"));
        assert_eq!(adapter.rule_hit_count("greeting"), 1);
        assert_eq!(adapter.request_count(), 2);
    }

    #[tokio::test]
    async fn test_fail_times_disarms_after_limit() {
        let adapter = MockAdapter::new(vec![MockRule::new(
            "flaky",
            RuleMatcher::default(),
            RuleAction::FailTimes {
                times: 2,
                error: GatewayError::ProviderAPI {
                    status: 500,
                    error_type: None,
                    error_code: None,
                    message: "upstream".into(),
                },
            },
        )]);

        assert!(adapter.execute(&chat("x"), &key()).await.is_err());
        assert!(adapter.execute(&chat("x"), &key()).await.is_err());
        assert!(adapter.execute(&chat("x"), &key()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_rule_emits_terminal_chunk() {
        let adapter = MockAdapter::new(vec![]);
        let mut stream = adapter.execute_stream(&chat("x"), &key()).await.unwrap();
        let mut finals = 0;
        let mut count = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            count += 1;
            if chunk.is_final() {
                finals += 1;
            }
        }
        assert_eq!(count, 2);
        assert_eq!(finals, 1);
    }

    #[test]
    fn test_deterministic_embedding_is_stable_and_normalised() {
        let a = deterministic_embedding("what is a gateway");
        let b = deterministic_embedding("what is a gateway");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
