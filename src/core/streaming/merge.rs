//! Chunk merge semantics
//!
//! Turns an ordered chunk sequence into one logical result. Inputs must
//! already be sorted by `chunk_index`; the merge is deterministic in that
//! order regardless of arrival order.

use smallvec::SmallVec;

use crate::core::types::{
    CacheDebug, ChunkDelta, GeneratedImage, MessageRole, StreamChunk, StreamError, ToolCall,
    Usage,
};

/// A fully merged reasoning detail
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningDetail {
    /// Detail slot
    pub index: u32,
    /// Concatenated text
    pub text: String,
    /// Concatenated summary
    pub summary: String,
    /// Concatenated opaque data
    pub data: String,
    /// Last signature seen
    pub signature: Option<String>,
    /// Last id seen
    pub id: Option<String>,
    /// Last type seen
    pub detail_type: Option<String>,
}

/// Merged audio payload of a chat stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedAudio {
    /// Last id seen
    pub id: Option<String>,
    /// Concatenated base64 data
    pub data: String,
    /// Concatenated transcript
    pub transcript: String,
    /// Last expiry seen
    pub expires_at: Option<i64>,
}

/// One materialised aggregate of a stream
#[derive(Debug, Clone, Default)]
pub struct AccumulatedData {
    /// Request the stream belonged to
    pub request_id: String,
    /// Model that produced it
    pub model: String,
    /// Merged chat content
    pub content: Option<String>,
    /// Final role; defaults to assistant when no chunk set one
    pub role: Option<MessageRole>,
    /// Merged reasoning text
    pub reasoning: Option<String>,
    /// Merged refusal text
    pub refusal: Option<String>,
    /// Merged structured reasoning, ordered by index
    pub reasoning_details: Vec<ReasoningDetail>,
    /// Assembled tool calls, ordered by index
    pub tool_calls: Vec<ToolCall>,
    /// Merged chat audio
    pub audio: Option<MergedAudio>,
    /// Merged completion text
    pub text: Option<String>,
    /// Merged images, ordered by image_index
    pub images: Vec<GeneratedImage>,
    /// Concatenated speech frames
    pub speech_audio: Vec<u8>,
    /// Concatenated transcription segments
    pub transcription_text: Option<String>,
    /// Usage from the highest-indexed chunk reporting one
    pub usage: Option<Usage>,
    /// Finish reason from the final chunk
    pub finish_reason: Option<String>,
    /// Cost from the final chunk
    pub cost: Option<f64>,
    /// Cache debug from the final chunk
    pub cache_debug: Option<CacheDebug>,
    /// Terminal stream error, when the stream failed
    pub error: Option<StreamError>,
    /// Chunks merged into this aggregate
    pub chunk_count: usize,
}

impl AccumulatedData {
    /// Effective role, defaulting to assistant
    pub fn role_or_default(&self) -> MessageRole {
        self.role.unwrap_or(MessageRole::Assistant)
    }
}

/// Argument fragments that carry no information and are skipped
fn is_empty_arguments(fragment: &str) -> bool {
    fragment.is_empty() || fragment == "{}"
}

#[derive(Default)]
struct ToolCallSlot {
    index: u32,
    id: Option<String>,
    call_type: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Default)]
struct ImageSlot {
    image_index: u32,
    b64: String,
    revised_prompt: Option<String>,
    url: Option<String>,
}

/// Merge chunks (already sorted by `chunk_index`) into one aggregate
pub fn merge_chunks(chunks: &[StreamChunk]) -> AccumulatedData {
    let mut data = AccumulatedData {
        chunk_count: chunks.len(),
        ..Default::default()
    };
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut refusal = String::new();
    let mut text = String::new();
    let mut transcription = String::new();
    // streams rarely carry more than a handful of parallel slots
    let mut tool_slots: SmallVec<[ToolCallSlot; 4]> = SmallVec::new();
    let mut detail_slots: SmallVec<[ReasoningDetail; 4]> = SmallVec::new();
    let mut image_slots: SmallVec<[ImageSlot; 4]> = SmallVec::new();
    let mut audio: Option<MergedAudio> = None;

    for chunk in chunks {
        if data.request_id.is_empty() {
            data.request_id = chunk.request_id.clone();
        }
        if data.model.is_empty() {
            data.model = chunk.model.clone();
        }
        if chunk.usage.is_some() {
            // sorted input makes this the highest-indexed reporter so far
            data.usage = chunk.usage.clone();
        }
        if chunk.is_final() {
            data.finish_reason = chunk.finish_reason.clone();
            data.cost = chunk.cost;
            data.cache_debug = chunk.cache_debug.clone();
            data.error = chunk.error.clone();
        }

        match &chunk.delta {
            ChunkDelta::Chat(delta) => {
                if let Some(role) = delta.role {
                    data.role = Some(role);
                }
                if let Some(fragment) = &delta.content {
                    content.push_str(fragment);
                }
                if let Some(fragment) = &delta.reasoning {
                    reasoning.push_str(fragment);
                }
                if let Some(fragment) = &delta.refusal {
                    refusal.push_str(fragment);
                }
                for fragment in &delta.reasoning_details {
                    let position = detail_slots
                        .iter()
                        .position(|s| s.index == fragment.index)
                        .unwrap_or_else(|| {
                            detail_slots.push(ReasoningDetail {
                                index: fragment.index,
                                ..Default::default()
                            });
                            detail_slots.len() - 1
                        });
                    let slot = &mut detail_slots[position];
                    if let Some(t) = &fragment.text {
                        slot.text.push_str(t);
                    }
                    if let Some(s) = &fragment.summary {
                        slot.summary.push_str(s);
                    }
                    if let Some(d) = &fragment.data {
                        slot.data.push_str(d);
                    }
                    if fragment.signature.is_some() {
                        slot.signature = fragment.signature.clone();
                    }
                    if fragment.id.is_some() {
                        slot.id = fragment.id.clone();
                    }
                    if fragment.detail_type.is_some() {
                        slot.detail_type = fragment.detail_type.clone();
                    }
                }
                for fragment in &delta.tool_calls {
                    let position = tool_slots
                        .iter()
                        .position(|s| s.index == fragment.index)
                        .unwrap_or_else(|| {
                            tool_slots.push(ToolCallSlot {
                                index: fragment.index,
                                ..Default::default()
                            });
                            tool_slots.len() - 1
                        });
                    let slot = &mut tool_slots[position];
                    if fragment.id.is_some() {
                        slot.id = fragment.id.clone();
                    }
                    if fragment.call_type.is_some() {
                        slot.call_type = fragment.call_type.clone();
                    }
                    if fragment.name.is_some() {
                        slot.name = fragment.name.clone();
                    }
                    if let Some(arguments) = &fragment.arguments {
                        if !is_empty_arguments(arguments) {
                            slot.arguments.push_str(arguments);
                        }
                    }
                }
                if let Some(fragment) = &delta.audio {
                    let merged = audio.get_or_insert_with(MergedAudio::default);
                    if fragment.id.is_some() {
                        merged.id = fragment.id.clone();
                    }
                    if let Some(d) = &fragment.data {
                        merged.data.push_str(d);
                    }
                    if let Some(t) = &fragment.transcript {
                        merged.transcript.push_str(t);
                    }
                    if fragment.expires_at.is_some() {
                        merged.expires_at = fragment.expires_at;
                    }
                }
            }
            ChunkDelta::Text { text: fragment } => text.push_str(fragment),
            ChunkDelta::Image(delta) => {
                let position = image_slots
                    .iter()
                    .position(|s| s.image_index == delta.image_index)
                    .unwrap_or_else(|| {
                        image_slots.push(ImageSlot {
                            image_index: delta.image_index,
                            ..Default::default()
                        });
                        image_slots.len() - 1
                    });
                let slot = &mut image_slots[position];
                if let Some(fragment) = &delta.partial_b64 {
                    slot.b64.push_str(fragment);
                }
                if slot.revised_prompt.is_none() {
                    if let Some(prompt) = &delta.revised_prompt {
                        if !prompt.is_empty() {
                            slot.revised_prompt = Some(prompt.clone());
                        }
                    }
                }
            }
            ChunkDelta::Speech { audio: frame } => data.speech_audio.extend_from_slice(frame),
            ChunkDelta::Transcription { text: segment } => transcription.push_str(segment),
            ChunkDelta::Done => {}
        }
    }

    if !content.is_empty() {
        data.content = Some(content);
    }
    if !reasoning.is_empty() {
        data.reasoning = Some(reasoning);
    }
    if !refusal.is_empty() {
        data.refusal = Some(refusal);
    }
    if !text.is_empty() {
        data.text = Some(text);
    }
    if !transcription.is_empty() {
        data.transcription_text = Some(transcription);
    }
    data.audio = audio;

    detail_slots.sort_by_key(|slot| slot.index);
    data.reasoning_details = detail_slots.into_vec();

    tool_slots.sort_by_key(|slot| slot.index);
    data.tool_calls = tool_slots
        .into_iter()
        .map(|slot| ToolCall {
            id: slot.id.unwrap_or_default(),
            call_type: slot.call_type.unwrap_or_else(|| "function".to_string()),
            function: crate::core::types::FunctionCall {
                name: slot.name.unwrap_or_default(),
                arguments: slot.arguments,
            },
        })
        .collect();

    image_slots.sort_by_key(|slot| slot.image_index);
    data.images = image_slots
        .into_iter()
        .map(|slot| GeneratedImage {
            image_index: slot.image_index,
            b64_json: (!slot.b64.is_empty()).then_some(slot.b64),
            url: slot.url,
            revised_prompt: slot.revised_prompt,
        })
        .collect();

    data
}
