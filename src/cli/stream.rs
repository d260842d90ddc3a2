//! Stream framing for Claude Code stdout and stderr.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cli::ClaudeEvent;

/// Size of a single read from a child pipe.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Ceiling on captured stderr embedded in error messages.
pub const STDERR_LIMIT: usize = 8 * 1024;

/// Error type for stream operations.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// A line could not be decoded as an event.
    #[error("Failed to parse event: {reason}")]
    ParseError {
        /// The offending line.
        input: String,
        /// Decoder message.
        reason: String,
    },
}

/// Parser for individual stream-json lines.
pub struct StreamParser;

impl StreamParser {
    /// Parse a single line of stream-json output.
    ///
    /// Returns `Ok(None)` for valid JSON of a shape the runner ignores.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::ParseError` if the line is not valid event JSON.
    pub fn parse_line(line: &str) -> Result<Option<ClaudeEvent>, StreamError> {
        ClaudeEvent::decode(line.trim()).map_err(|e| StreamError::ParseError {
            input: line.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Splits a byte stream into newline-terminated lines.
///
/// A trailing fragment without a newline is retained until a later chunk
/// completes it. Splitting happens on raw bytes, so multi-byte UTF-8
/// sequences cut across chunk boundaries are decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Number of buffered bytes not yet terminated by a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the unterminated remainder at end of stream, if it holds anything.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Captured output truncated to a byte ceiling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    /// Retained text (at most the ceiling, cut on a char boundary).
    pub text: String,
    /// Number of bytes discarded past the ceiling.
    pub dropped: usize,
}

impl BoundedOutput {
    /// Build from raw bytes, keeping at most `limit` bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], dropped: usize, limit: usize) -> Self {
        let keep = bytes.len().min(limit);
        let extra = bytes.len() - keep;
        let mut text = String::from_utf8_lossy(&bytes[..keep]).into_owned();
        if text.len() > limit {
            let mut cut = limit;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Self {
            text,
            dropped: dropped + extra,
        }
    }

    /// Render for embedding in an error message. Only the trailing line
    /// break is removed.
    #[must_use]
    pub fn render(&self) -> String {
        let text = self.text.trim_end_matches(['\n', '\r']);
        if self.dropped == 0 {
            text.to_string()
        } else {
            format!("{text}\n... [{} bytes truncated]", self.dropped)
        }
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.dropped == 0
    }
}

/// Read a pipe to EOF, retaining at most `limit` bytes.
///
/// The pipe is drained completely so a chatty child never blocks on a full
/// stderr buffer. Read errors end the capture early.
pub async fn drain_bounded<R>(mut reader: R, limit: usize) -> BoundedOutput
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                let take = room.min(n);
                kept.extend_from_slice(&buf[..take]);
                dropped += n - take;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped capturing pipe after read error");
                break;
            }
        }
    }

    BoundedOutput::from_bytes(&kept, dropped, limit)
}
