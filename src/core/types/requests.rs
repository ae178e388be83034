//! Canonical request schema
//!
//! Every caller speaks this provider-independent shape. Adapters translate
//! it to the provider's native wire format at dispatch time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::context::RequestContext;

/// Supported provider families
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI
    OpenAI,
    /// Anthropic
    Anthropic,
    /// Azure OpenAI
    Azure,
    /// AWS Bedrock
    Bedrock,
    /// Cohere
    Cohere,
    /// Google Vertex AI
    Vertex,
    /// Groq
    Groq,
    /// Mistral
    Mistral,
    /// xAI
    #[serde(rename = "xai")]
    XAI,
    /// In-process mock provider, used by tests and local development
    Mock,
    /// Any other OpenAI-compatible endpoint, keyed by name
    #[serde(untagged)]
    Custom(String),
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Anthropic => write!(f, "anthropic"),
            ProviderType::Azure => write!(f, "azure"),
            ProviderType::Bedrock => write!(f, "bedrock"),
            ProviderType::Cohere => write!(f, "cohere"),
            ProviderType::Vertex => write!(f, "vertex"),
            ProviderType::Groq => write!(f, "groq"),
            ProviderType::Mistral => write!(f, "mistral"),
            ProviderType::XAI => write!(f, "xai"),
            ProviderType::Mock => write!(f, "mock"),
            ProviderType::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for ProviderType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "openai" => ProviderType::OpenAI,
            "anthropic" => ProviderType::Anthropic,
            "azure" => ProviderType::Azure,
            "bedrock" => ProviderType::Bedrock,
            "cohere" => ProviderType::Cohere,
            "vertex" => ProviderType::Vertex,
            "groq" => ProviderType::Groq,
            "mistral" => ProviderType::Mistral,
            "xai" => ProviderType::XAI,
            "mock" => ProviderType::Mock,
            other => ProviderType::Custom(other.to_string()),
        })
    }
}

/// Request kind, derived from the input payload and stream flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Plain text completion
    TextCompletion,
    /// Chat completion
    Chat,
    /// Responses-style structured completion
    Responses,
    /// Text embedding
    Embedding,
    /// Document reranking
    Rerank,
    /// Text to speech
    Speech,
    /// Speech to text
    Transcription,
    /// Image generation
    ImageGeneration,
    /// Model listing
    ListModels,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestKind::TextCompletion => "text_completion",
            RequestKind::Chat => "chat",
            RequestKind::Responses => "responses",
            RequestKind::Embedding => "embedding",
            RequestKind::Rerank => "rerank",
            RequestKind::Speech => "speech",
            RequestKind::Transcription => "transcription",
            RequestKind::ImageGeneration => "image_generation",
            RequestKind::ListModels => "list_models",
        };
        write!(f, "{s}")
    }
}

impl RequestKind {
    /// Kinds that can stream deltas back to the caller
    pub fn supports_streaming(&self) -> bool {
        matches!(
            self,
            RequestKind::TextCompletion
                | RequestKind::Chat
                | RequestKind::Responses
                | RequestKind::Speech
                | RequestKind::Transcription
                | RequestKind::ImageGeneration
        )
    }
}

/// Message role in a chat conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
    /// Tool result turn
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// Message content: plain text or multimodal parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content
    Text(String),
    /// Multimodal content parts
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten to text, joining parts with newlines
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One multimodal content part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part
    Text {
        /// The text
        text: String,
    },
    /// Image reference part
    ImageUrl {
        /// URL or data URI of the image
        url: String,
    },
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role
    pub role: MessageRole,
    /// Message content
    pub content: MessageContent,
    /// Optional participant name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls issued by an assistant turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Id of the tool call a tool turn responds to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Build a plain-text message
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// A completed tool invocation request from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id
    pub id: String,
    /// Call type, currently always `"function"`
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function being invoked
    pub function: FunctionCall,
}

/// Function name and serialized arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// A tool the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool type, currently always `"function"`
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function declaration
    pub function: FunctionDefinition,
}

/// Declared function shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool choice directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"auto"`, `"none"` or `"required"`
    Mode(String),
    /// Force a specific function
    Function {
        /// Always `"function"`
        #[serde(rename = "type")]
        choice_type: String,
        /// The function to force
        function: ToolChoiceFunction,
    },
}

/// Named function in a forced tool choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    /// Function name
    pub name: String,
}

/// Kind-independent sampling and control parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling probability mass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling cutoff
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Completion token cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Tools available to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool choice directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// End-user identifier for abuse tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Provider-specific passthrough parameters
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extras: HashMap<String, serde_json::Value>,
}

/// Kind-specific input payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestInput {
    /// Text completion prompt
    Text {
        /// The prompt
        prompt: String,
    },
    /// Chat conversation
    Chat {
        /// Ordered messages
        messages: Vec<ChatMessage>,
    },
    /// Responses-style input (structured chat items)
    Responses {
        /// Ordered input items
        input: Vec<ChatMessage>,
    },
    /// Embedding input
    Embedding {
        /// Texts to embed
        input: Vec<String>,
    },
    /// Rerank query and candidates
    Rerank {
        /// The query
        query: String,
        /// Candidate documents
        documents: Vec<String>,
    },
    /// Text-to-speech input
    Speech {
        /// Text to speak
        input: String,
        /// Voice id
        voice: String,
        /// Output audio format
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Speech-to-text input
    Transcription {
        /// Raw audio bytes
        #[serde(with = "crate::core::types::base64_bytes")]
        audio: Vec<u8>,
        /// Input audio format
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        /// Expected language
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Image generation prompt
    ImageGeneration {
        /// The prompt
        prompt: String,
        /// Number of images
        #[serde(skip_serializing_if = "Option::is_none")]
        n: Option<u32>,
        /// Requested size, e.g. `"1024x1024"`
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<String>,
    },
    /// Model listing request
    ListModels,
}

impl RequestInput {
    /// The request kind this payload belongs to
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestInput::Text { .. } => RequestKind::TextCompletion,
            RequestInput::Chat { .. } => RequestKind::Chat,
            RequestInput::Responses { .. } => RequestKind::Responses,
            RequestInput::Embedding { .. } => RequestKind::Embedding,
            RequestInput::Rerank { .. } => RequestKind::Rerank,
            RequestInput::Speech { .. } => RequestKind::Speech,
            RequestInput::Transcription { .. } => RequestKind::Transcription,
            RequestInput::ImageGeneration { .. } => RequestKind::ImageGeneration,
            RequestInput::ListModels => RequestKind::ListModels,
        }
    }

    /// Chat messages when the payload carries a conversation
    pub fn messages(&self) -> Option<&[ChatMessage]> {
        match self {
            RequestInput::Chat { messages } => Some(messages),
            RequestInput::Responses { input } => Some(input),
            _ => None,
        }
    }
}

/// One `{provider, model}` alternate in the fallback cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback {
    /// Alternate provider
    pub provider: ProviderType,
    /// Alternate model
    pub model: String,
}

/// The canonical gateway request
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Target provider
    pub provider: ProviderType,
    /// Target model id
    pub model: String,
    /// Kind-specific payload
    pub input: RequestInput,
    /// Sampling and control parameters
    pub params: RequestParams,
    /// Whether the caller wants a streamed response
    pub stream: bool,
    /// Ordered fallback alternates
    pub fallbacks: Vec<Fallback>,
    /// Correlation ids and hook-shared values
    pub context: RequestContext,
}

impl GatewayRequest {
    /// Build a unary request with default params and a fresh context
    pub fn new(provider: ProviderType, model: impl Into<String>, input: RequestInput) -> Self {
        Self {
            provider,
            model: model.into(),
            input,
            params: RequestParams::default(),
            stream: false,
            fallbacks: Vec::new(),
            context: RequestContext::new(),
        }
    }

    /// The request kind, accounting for the stream flag
    pub fn kind(&self) -> RequestKind {
        self.input.kind()
    }

    /// Validate the canonical shape before it reaches any hook
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        use crate::utils::error::GatewayError;

        if self.context.request_id().is_empty() {
            return Err(GatewayError::Validation("empty request id".into()));
        }
        if self.model.is_empty() && self.kind() != RequestKind::ListModels {
            return Err(GatewayError::Validation("empty model id".into()));
        }
        if self.stream && !self.kind().supports_streaming() {
            return Err(GatewayError::Validation(format!(
                "{} requests cannot stream",
                self.kind()
            )));
        }
        match &self.input {
            RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => {
                if messages.is_empty() {
                    return Err(GatewayError::Validation("empty message list".into()));
                }
            }
            RequestInput::Embedding { input } => {
                if input.is_empty() {
                    return Err(GatewayError::Validation("empty embedding input".into()));
                }
            }
            RequestInput::Rerank { documents, .. } => {
                if documents.is_empty() {
                    return Err(GatewayError::Validation("empty document list".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_round_trip() {
        for name in ["openai", "anthropic", "azure", "groq", "xai", "mock"] {
            let parsed: ProviderType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        let custom: ProviderType = "ollama".parse().unwrap();
        assert_eq!(custom, ProviderType::Custom("ollama".into()));
    }

    #[test]
    fn test_validation_rejects_empty_chat() {
        let request = GatewayRequest::new(
            ProviderType::OpenAI,
            "gpt-4o-mini",
            RequestInput::Chat { messages: vec![] },
        );
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_streaming_embedding() {
        let mut request = GatewayRequest::new(
            ProviderType::OpenAI,
            "text-embedding-3-small",
            RequestInput::Embedding {
                input: vec!["hello".into()],
            },
        );
        request.stream = true;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_content_flattening() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "look at".into(),
            },
            ContentPart::ImageUrl {
                url: "https://example.com/cat.png".into(),
            },
            ContentPart::Text {
                text: "this".into(),
            },
        ]);
        assert_eq!(content.as_text(), "look at\nthis");
    }
}
