//! Canonical type system: requests, responses, stream chunks, context

pub mod context;
pub mod requests;
pub mod responses;
pub mod streaming;

pub use context::{CancelToken, ContextValue, RequestContext};
pub use requests::{
    ChatMessage, ContentPart, Fallback, FunctionCall, FunctionDefinition, GatewayRequest,
    MessageContent, MessageRole, ProviderType, RequestInput, RequestKind, RequestParams, Tool,
    ToolCall, ToolChoice, ToolChoiceFunction,
};
pub use responses::{
    CacheDebug, ChatChoice, EmbeddingData, ExtraFields, GatewayResponse, GeneratedImage,
    ModelInfo, RerankResult, ResponsePayload, TextChoice, TranscriptionSegment, Usage,
};
pub use streaming::{
    AudioDelta, ChatDelta, ChunkDelta, ImageDelta, ReasoningDetailDelta, StreamChunk,
    StreamError, ToolCallDelta,
};

/// Base64 serde adapter for binary payloads (audio frames, uploads)
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as standard base64
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Deserialize standard base64 into bytes
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
