//! Canonical stream chunk schema
//!
//! Each streamed delta carries a per-stream `chunk_index` assigned in
//! provider-emit order, a kind-specific delta payload, and the terminal
//! markers (`finish_reason`, error, end-of-stream) that together define
//! the `is_final` sentinel.

use serde::{Deserialize, Serialize};

use super::requests::MessageRole;
use super::responses::{CacheDebug, Usage};

/// Incremental tool-call fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Tool-call slot this fragment belongs to
    pub index: u32,
    /// Call id, usually only on the first fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call type, usually only on the first fragment
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function name, usually only on the first fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Incremental reasoning-detail fragment, accumulated per index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningDetailDelta {
    /// Detail slot this fragment belongs to
    pub index: u32,
    /// Text fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Summary fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Opaque data fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Signature, last writer wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Detail id, last writer wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Detail type, last writer wins
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub detail_type: Option<String>,
}

/// Incremental audio fragment on a chat stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioDelta {
    /// Audio id, last writer wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Base64 audio data fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Transcript fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Expiry timestamp, last writer wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Incremental chat delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    /// Role, set by at most one chunk per stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    /// Content fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Refusal fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// Structured reasoning fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_details: Vec<ReasoningDetailDelta>,
    /// Tool-call fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    /// Audio fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioDelta>,
}

/// Incremental image-generation delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDelta {
    /// Image slot this fragment belongs to
    pub image_index: u32,
    /// Base64 fragment to append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_b64: Option<String>,
    /// Revised prompt, first non-empty wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Kind-specific delta payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkDelta {
    /// Chat delta
    Chat(ChatDelta),
    /// Text-completion delta
    Text {
        /// Text fragment to append
        text: String,
    },
    /// Image-generation delta
    Image(ImageDelta),
    /// Speech audio frame
    Speech {
        /// Raw audio frame bytes
        #[serde(with = "crate::core::types::base64_bytes")]
        audio: Vec<u8>,
    },
    /// Transcription segment
    Transcription {
        /// Segment text
        text: String,
    },
    /// Synthetic end-of-stream marker carrying no payload
    Done,
}

/// Terminal error carried on a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    /// Error message
    pub message: String,
    /// Provider status code, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// One canonical stream chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Request this chunk belongs to
    pub request_id: String,
    /// Strictly increasing per-stream index
    pub chunk_index: u64,
    /// Model producing the stream
    pub model: String,
    /// Delta payload
    pub delta: ChunkDelta,
    /// Finish reason; presence marks the chunk final
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Usage, reported near the end of the stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Terminal error; presence marks the chunk final
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StreamError>,
    /// Billed cost, carried by the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Cache lookup outcome, carried by the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_debug: Option<CacheDebug>,
}

impl StreamChunk {
    /// A content-bearing chunk with no terminal markers
    pub fn delta(request_id: impl Into<String>, model: impl Into<String>, chunk_index: u64, delta: ChunkDelta) -> Self {
        Self {
            request_id: request_id.into(),
            chunk_index,
            model: model.into(),
            delta,
            finish_reason: None,
            usage: None,
            error: None,
            cost: None,
            cache_debug: None,
        }
    }

    /// Whether this chunk terminates the stream
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
            || self.error.is_some()
            || matches!(self.delta, ChunkDelta::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_detection() {
        let mut chunk = StreamChunk::delta(
            "req-1",
            "gpt-4o-mini",
            0,
            ChunkDelta::Chat(ChatDelta {
                content: Some("hi".into()),
                ..Default::default()
            }),
        );
        assert!(!chunk.is_final());

        chunk.finish_reason = Some("stop".into());
        assert!(chunk.is_final());

        let errored = StreamChunk {
            finish_reason: None,
            error: Some(StreamError {
                message: "boom".into(),
                status: Some(500),
            }),
            ..StreamChunk::delta("req-1", "gpt-4o-mini", 1, ChunkDelta::Done)
        };
        assert!(errored.is_final());
    }

    #[test]
    fn test_done_marker_is_final() {
        let done = StreamChunk::delta("req-1", "gpt-4o-mini", 5, ChunkDelta::Done);
        assert!(done.is_final());
    }
}
