//! Incremental frame decoder.
//!
//! Tolerant reader: unknown line prefixes are ignored, invalid UTF-8 is
//! replaced rather than rejected.

use super::types::{DEFAULT_EVENT, Frame};

const FRAME_DELIMITER: &str = "\n\n";
const REPLACEMENT: char = '\u{FFFD}';

/// Stateful decoder that accumulates byte chunks and yields complete frames.
///
/// Bytes of a multi-byte UTF-8 sequence split across chunks are held back
/// until the sequence completes, and `\r\n` is normalised to `\n` even when
/// the pair straddles a chunk boundary, so the emitted frames never depend on
/// how the stream was chunked.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text not yet terminated by a blank line.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    partial: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        let mut input = std::mem::take(&mut self.partial);
        input.extend_from_slice(chunk);

        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(REPLACEMENT);
                            rest = &after[len..];
                        }
                        None => {
                            self.partial = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }

    /// Pop the next deliverable frame, skipping keep-alives and empty frames.
    ///
    /// Returns `None` once no complete frame remains in the buffer.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            let raw: String = self.buffer.drain(..pos + FRAME_DELIMITER.len()).collect();
            if let Some(frame) = parse_frame(&raw[..pos]) {
                return Some(frame);
            }
        }
        None
    }

    /// Number of buffered bytes that do not yet form a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buffer.len() + self.partial.len()
    }
}

/// Parse the raw text of one frame (without its trailing blank line).
///
/// Returns `None` for keep-alive comments and for frames that carry neither
/// data nor a non-default event name.
pub fn parse_frame(raw: &str) -> Option<Frame> {
    if raw.starts_with(':') {
        return None;
    }

    let mut event: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.split('\n') {
        if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    let event = event.filter(|name| !name.is_empty()).unwrap_or(DEFAULT_EVENT);
    let data = data.join("\n");

    if data.is_empty() && event == DEFAULT_EVENT {
        return None;
    }

    Some(Frame::new(event, data))
}
