//! Server-Sent Events frame parsing
//!
//! Providers stream responses as `data: <json>\n\n` frames terminated by
//! `data: [DONE]` or an idle close. This parser buffers raw bytes and
//! yields one data payload per complete frame.

/// Incremental SSE frame parser over a raw byte feed
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

/// One parsed SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A `data:` payload
    Data(String),
    /// The `[DONE]` terminator
    Done,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by this feed.
    ///
    /// Partial frames stay buffered until the terminating blank line
    /// arrives. Non-UTF8 bytes are replaced lossily; providers send UTF-8.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..pos + 2).collect();
            if let Some(frame) = Self::parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    fn parse_frame(raw: &str) -> Option<SseFrame> {
        let mut data_lines = Vec::new();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
            // event:/id:/retry: lines and comments are ignored; providers
            // multiplex everything through the data payload.
        }
        if data_lines.is_empty() {
            return None;
        }
        let data = data_lines.join("\n");
        if data.trim() == "[DONE]" {
            Some(SseFrame::Done)
        } else {
            Some(SseFrame::Data(data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"data: {\"x\":1}\n\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"x\":1}".to_string())]);
    }

    #[test]
    fn test_split_across_feeds() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"x\"").is_empty());
        let frames = parser.feed(b":1}\n\ndata: [DONE]\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Data("{\"x\":1}".to_string()), SseFrame::Done]
        );
    }

    #[test]
    fn test_event_lines_ignored() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"event: message_start\ndata: {\"y\":2}\n\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"y\":2}".to_string())]);
    }

    #[test]
    fn test_comment_only_frame_skipped() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": keepalive\n\n").is_empty());
    }
}
