//! Frame Reader
//!
//! Splits a Server-Sent Events byte stream into complete `data:` payloads.
//! Bytes are buffered across reads, so a frame (or a UTF-8 sequence) may be
//! split at any point by the transport.

use crate::error::{DeepSeekError, Result};

/// Payload marking the end of the event stream
pub const DONE_SENTINEL: &str = "[DONE]";

const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// One complete event extracted from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The `data` payload of a record
    Data(String),

    /// The termination sentinel
    Done,
}

/// Incremental SSE frame reader
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    /// Offset up to which `buffer` holds no record boundary
    scanned: usize,
}

impl FrameReader {
    /// Create a new reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk.
    ///
    /// Returns every frame the chunk completes. When a record fails to parse,
    /// the frames completed before it are still returned together with the
    /// error, and the rest of the chunk is not examined.
    pub fn feed(&mut self, bytes: &[u8]) -> (Vec<Frame>, Option<DeepSeekError>) {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some((end, delimiter_len)) = self.find_boundary() {
            let record: Vec<u8> = self.buffer.drain(..end + delimiter_len).collect();
            self.scanned = 0;
            match parse_record(&record[..end]) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(err) => return (frames, Some(err)),
            }
        }

        if self.buffer.len() > MAX_FRAME_SIZE {
            let err = DeepSeekError::MalformedChunk(format!(
                "pending frame exceeds {} bytes",
                MAX_FRAME_SIZE
            ));
            return (frames, Some(err));
        }

        (frames, None)
    }

    /// Flush at transport close.
    ///
    /// A remainder without data (blank lines, comments, `event:`/`id:`
    /// fields) is a clean end and an undelimited `[DONE]` record is accepted.
    /// Undelimited data is a truncated frame.
    pub fn finish(&mut self) -> Result<Option<Frame>> {
        let remainder = std::mem::take(&mut self.buffer);
        self.scanned = 0;

        if remainder.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        match parse_record(&remainder) {
            Ok(None) => Ok(None),
            Ok(Some(Frame::Done)) => Ok(Some(Frame::Done)),
            _ => Err(DeepSeekError::TruncatedStream {
                pending_bytes: remainder.len(),
            }),
        }
    }

    /// Whether non-blank bytes are waiting for a delimiter
    pub fn has_pending(&self) -> bool {
        !self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    /// Locate the first blank line: `\n\n`, or `\n\r\n` which also covers
    /// `\r\n\r\n`. Returns the record end and the delimiter length.
    fn find_boundary(&mut self) -> Option<(usize, usize)> {
        let start = self.scanned.saturating_sub(2);
        let haystack = &self.buffer[start..];

        for (offset, window) in haystack.windows(2).enumerate() {
            if window[0] != b'\n' {
                continue;
            }
            let pos = start + offset;
            if window[1] == b'\n' {
                return Some((pos, 2));
            }
            if window[1] == b'\r' && self.buffer.get(pos + 2) == Some(&b'\n') {
                return Some((pos, 3));
            }
        }

        self.scanned = self.buffer.len();
        None
    }
}

/// Parse one record (without its terminating blank line)
fn parse_record(record: &[u8]) -> Result<Option<Frame>> {
    let text = std::str::from_utf8(record)
        .map_err(|e| DeepSeekError::MalformedChunk(format!("frame is not UTF-8: {}", e)))?;

    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        // event, id and retry carry nothing this API uses
        if field == "data" {
            data_lines.push(value);
        }
    }

    if data_lines.is_empty() {
        return Ok(None);
    }

    let data = data_lines.join("\n");
    if data.trim() == DONE_SENTINEL {
        return Ok(Some(Frame::Done));
    }

    Ok(Some(Frame::Data(data)))
}
