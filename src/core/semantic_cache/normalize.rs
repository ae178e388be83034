//! Input normalisation and request hashing
//!
//! Cache identity is computed over a normalised rendering of the input
//! (lower-cased, trimmed user-visible strings) combined with the params
//! and the stream flag, hashed with XXH64 so the value is stable across
//! processes and restarts.

use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::core::types::{MessageRole, RequestInput, RequestParams};

/// Render the canonical input to normalised text.
///
/// All user-visible strings are lower-cased and trimmed; chat turns keep
/// their role prefix so the same words in different roles stay distinct.
pub fn normalize_input(input: &RequestInput, exclude_system_prompt: bool) -> String {
    fn clean(text: &str) -> String {
        text.trim().to_lowercase()
    }

    match input {
        RequestInput::Text { prompt } => clean(prompt),
        RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => messages
            .iter()
            .filter(|m| !(exclude_system_prompt && m.role == MessageRole::System))
            .map(|m| format!("{}: {}", m.role, clean(&m.content.as_text())))
            .collect::<Vec<_>>()
            .join("\n"),
        RequestInput::Embedding { input } => input
            .iter()
            .map(|text| clean(text))
            .collect::<Vec<_>>()
            .join("\n"),
        RequestInput::Rerank { query, documents } => {
            let mut parts = vec![clean(query)];
            parts.extend(documents.iter().map(|d| clean(d)));
            parts.join("\n")
        }
        RequestInput::Speech { input, voice, .. } => format!("{}: {}", voice, clean(input)),
        RequestInput::ImageGeneration { prompt, n, size } => format!(
            "{} n={} size={}",
            clean(prompt),
            n.unwrap_or(1),
            size.as_deref().unwrap_or("default")
        ),
        RequestInput::Transcription { .. } | RequestInput::ListModels => String::new(),
    }
}

/// Stable hash over params alone, used as a strict metadata filter
pub fn params_hash(params: &RequestParams) -> String {
    let serialized = serde_json::to_string(params).unwrap_or_default();
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(serialized.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Stable hash identifying the exact request: normalised input, params
/// and the stream flag
pub fn request_hash(normalized_input: &str, params: &RequestParams, stream: bool) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(normalized_input.as_bytes());
    hasher.write(params_hash(params).as_bytes());
    hasher.write(&[stream as u8]);
    format!("{:016x}", hasher.finish())
}
