//! Newline-delimited JSON framing.
//!
//! The wire format is UTF-8 text, one JSON value per line terminated by `\n`
//! with an optional trailing `\r`. The buffer accumulates raw bytes and only
//! splits at newline boundaries, so a chunk ending mid-multibyte-character
//! reassembles identically to the unsplit stream.

use crate::error::McpError;
use bytes::BytesMut;

/// Accumulates stream chunks and yields complete framed messages.
///
/// Invariant: after every `read_next` loop the buffer holds exactly the
/// unparsed suffix of the stream seen so far.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: BytesMut,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append a raw chunk of the stream.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete message, or `None` if no full line is buffered.
    ///
    /// Blank lines are skipped. A line that fails to parse is consumed and
    /// reported as `McpError::Frame`; the caller logs it and keeps draining.
    /// Call in a loop until `Ok(None)` to drain everything a chunk delivered.
    pub fn read_next(&mut self) -> Result<Option<serde_json::Value>, McpError> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.split_to(pos + 1);
            let mut line = &line[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return match serde_json::from_slice(line) {
                Ok(value) => Ok(Some(value)),
                Err(e) => Err(McpError::Frame {
                    reason: format!("{e}: {}", String::from_utf8_lossy(line)),
                }),
            };
        }
    }

    /// Drop any buffered partial data.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Serialize one message to its wire form: JSON plus exactly one newline.
pub fn serialize(message: &serde_json::Value) -> Result<String, McpError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
