//! Newline-delimited JSON decoding for streamed generation replies.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks decode correctly.

use serde_json::Value;

/// Splits a byte stream into trimmed, non-empty lines
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// Flush a final line that had no trailing newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// One decoded object of a streamed `/api/generate` reply
#[derive(Clone, Debug, PartialEq)]
pub struct GenerateChunk {
    /// Text fragment (may be empty)
    pub text: String,
    /// Completion marker
    pub done: bool,
    /// The whole object
    pub raw: Value,
}

impl GenerateChunk {
    /// Parse a line; `None` for anything that is not a JSON object
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let raw: Value = serde_json::from_str(line).ok()?;
        if !raw.is_object() {
            return None;
        }
        let text = raw
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let done = raw.get("done").and_then(Value::as_bool).unwrap_or(false);
        Some(Self { text, done, raw })
    }

    /// Backend-reported error, if the object carries one
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.raw.get("error").and_then(Value::as_str)
    }
}
