//! Canonical response schema
//!
//! Mirrors the request kinds. Every response carries an [`ExtraFields`]
//! envelope with gateway-level metadata (provider, latency, cache debug,
//! billed usage) alongside the provider payload.

use serde::{Deserialize, Serialize};

use super::requests::{ChatMessage, ProviderType, RequestKind, RequestParams};

/// Token usage reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens produced in the completion
    pub completion_tokens: u32,
    /// Sum of the above
    pub total_tokens: u32,
}

impl Usage {
    /// Build a usage record, deriving the total
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Cache lookup outcome attached to responses served by the cache layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDebug {
    /// Whether the response was served from cache
    pub cache_hit: bool,
    /// `"direct"` or `"semantic"` on a hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_type: Option<String>,
    /// Id of the cache entry that served the hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    /// Similarity threshold in force during the lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Similarity score of a semantic hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Gateway-level metadata envelope on every response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraFields {
    /// Provider that produced the response
    pub provider: ProviderType,
    /// Model the caller asked for (before any aliasing)
    pub model_requested: String,
    /// Request kind
    pub request_type: RequestKind,
    /// Wall-clock latency of the provider call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Raw provider request body, when passthrough is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<serde_json::Value>,
    /// Raw provider response body, when passthrough is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    /// Cache lookup outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_debug: Option<CacheDebug>,
    /// Usage the caller is billed for (may differ from provider usage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billed_usage: Option<Usage>,
    /// Index of the chunk this response was materialised from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
    /// Params the request carried, echoed for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl ExtraFields {
    /// Minimal envelope for a provider/model/kind triple
    pub fn new(provider: ProviderType, model_requested: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            provider,
            model_requested: model_requested.into(),
            request_type: kind,
            latency_ms: None,
            raw_request: None,
            raw_response: None,
            cache_debug: None,
            billed_usage: None,
            chunk_index: None,
            params: None,
        }
    }
}

/// One chat completion choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index
    pub index: u32,
    /// The assistant message
    pub message: ChatMessage,
    /// Why generation stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One text completion choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChoice {
    /// Choice index
    pub index: u32,
    /// Completed text
    pub text: String,
    /// Why generation stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingData {
    /// Input index this vector corresponds to
    pub index: u32,
    /// The vector
    pub embedding: Vec<f32>,
}

/// One rerank result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankResult {
    /// Document index in the request
    pub index: u32,
    /// Relevance score, higher is more relevant
    pub relevance_score: f64,
}

/// One generated image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Image index within the batch
    pub image_index: u32,
    /// Base64-encoded image payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    /// Image URL, when the provider hosts the result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Prompt after provider-side revision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// One transcription segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    /// Segment index
    pub index: u32,
    /// Segment text
    pub text: String,
    /// Segment start offset in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    /// Segment end offset in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

/// Descriptor of one servable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id
    pub id: String,
    /// Owning provider
    pub provider: ProviderType,
    /// Context window size, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

/// Kind-specific response payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Chat completion choices
    Chat {
        /// The choices
        choices: Vec<ChatChoice>,
    },
    /// Text completion choices
    Text {
        /// The choices
        choices: Vec<TextChoice>,
    },
    /// Responses-style output
    Responses {
        /// Output items
        output: Vec<ChatChoice>,
    },
    /// Embedding vectors
    Embedding {
        /// Vectors, one per input
        data: Vec<EmbeddingData>,
    },
    /// Rerank scores
    Rerank {
        /// Scored documents, sorted by relevance
        results: Vec<RerankResult>,
    },
    /// Synthesised speech
    Speech {
        /// Raw audio bytes
        #[serde(with = "crate::core::types::base64_bytes")]
        audio: Vec<u8>,
    },
    /// Transcribed audio
    Transcription {
        /// Full transcript
        text: String,
        /// Per-segment breakdown
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        segments: Vec<TranscriptionSegment>,
    },
    /// Generated images
    Image {
        /// Images sorted by image_index
        images: Vec<GeneratedImage>,
    },
    /// Model listing
    ModelList {
        /// Available models
        models: Vec<ModelInfo>,
    },
}

/// The canonical gateway response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Provider-assigned or gateway-assigned response id
    pub id: String,
    /// Unix creation timestamp
    pub created: i64,
    /// Model that actually served the request
    pub model: String,
    /// Kind-specific payload
    pub payload: ResponsePayload,
    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Gateway metadata envelope
    pub extra: ExtraFields,
}

impl GatewayResponse {
    /// Finish reason of the first choice, when the payload has choices
    pub fn finish_reason(&self) -> Option<&str> {
        match &self.payload {
            ResponsePayload::Chat { choices } | ResponsePayload::Responses { output: choices } => {
                choices.first().and_then(|c| c.finish_reason.as_deref())
            }
            ResponsePayload::Text { choices } => {
                choices.first().and_then(|c| c.finish_reason.as_deref())
            }
            _ => None,
        }
    }

    /// Assistant text of the first choice, when the payload has one
    pub fn content_text(&self) -> Option<String> {
        match &self.payload {
            ResponsePayload::Chat { choices } | ResponsePayload::Responses { output: choices } => {
                choices.first().map(|c| c.message.content.as_text())
            }
            ResponsePayload::Text { choices } => choices.first().map(|c| c.text.clone()),
            ResponsePayload::Transcription { text, .. } => Some(text.clone()),
            _ => None,
        }
    }
}
