//! Streaming Response Reader
//!
//! Incrementally decodes `data:`-prefixed, newline-delimited frames from an
//! HTTP response body. Lines are only interpreted once complete, so the
//! decoded frames do not depend on where the body was split into chunks.

use crate::error::{RelayError, Result};
use crate::extract;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use regex::Regex;
use serde_json::Value;
use std::pin::Pin;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Maximum bytes held while waiting for a line break.
pub const MAX_LINE_BUFFER_SIZE: usize = 1024 * 1024;

const DATA_MARKER: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// A boxed stream of response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One decoded data frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A payload that parsed as JSON.
    Json(Value),
    /// A payload that did not parse; kept raw for salvage.
    Malformed(String),
    /// The end-of-stream sentinel.
    Done,
}

/// Splits a byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sentinel has been seen. Later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds a chunk and returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = self.decode_line(&line[..line.len() - 1]) {
                frames.push(frame);
                if self.finished {
                    self.buffer.clear();
                    return Ok(frames);
                }
            }
        }

        if self.buffer.len() > MAX_LINE_BUFFER_SIZE {
            return Err(RelayError::StreamOverflow(MAX_LINE_BUFFER_SIZE));
        }
        Ok(frames)
    }

    /// Processes whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished || self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<Frame> {
        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
        let payload = line.strip_prefix(DATA_MARKER)?.trim_start();
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            self.finished = true;
            return Some(Frame::Done);
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => Some(Frame::Json(value)),
            Err(e) => {
                debug!(error = %e, "Frame payload is not valid JSON");
                Some(Frame::Malformed(payload.to_string()))
            }
        }
    }
}

static TEXT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""text"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("text salvage pattern is valid")
});

/// Recovers the value of a `"text":"..."` field from a line that failed to parse.
pub fn salvage_text(raw: &str) -> Option<String> {
    let captured = TEXT_FIELD.captures(raw)?.get(1)?.as_str();
    serde_json::from_str::<String>(&format!("\"{}\"", captured))
        .ok()
        .or_else(|| Some(captured.to_string()))
        .filter(|text| !text.is_empty())
}

/// Builds up response text from a sequence of frames.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a frame and returns the fragment it contributed, if any.
    pub fn ingest(&mut self, frame: &Frame) -> Option<String> {
        let fragment = match frame {
            Frame::Json(value) if extract::is_terminal_summary(value) => {
                if !self.text.is_empty() {
                    return None;
                }
                extract::envelope_text(value).or_else(|| extract::delta_text(value))
            }
            Frame::Json(value) => extract::delta_text(value),
            Frame::Malformed(raw) => {
                let salvaged = salvage_text(raw);
                if salvaged.is_none() {
                    warn!("Skipping unreadable stream line");
                }
                salvaged
            }
            Frame::Done => None,
        }?;
        self.text.push_str(&fragment);
        Some(fragment)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Drains a response body into its concatenated text.
///
/// `on_fragment` sees each delta as it arrives.
pub async fn read_text_stream<F>(mut body: ByteStream, mut on_fragment: F) -> Result<String>
where
    F: FnMut(&str),
{
    let mut decoder = FrameDecoder::new();
    let mut accumulator = TextAccumulator::new();

    while let Some(chunk) = body.next().await {
        for frame in decoder.push(&chunk?)? {
            if let Some(fragment) = accumulator.ingest(&frame) {
                on_fragment(&fragment);
            }
        }
        if decoder.is_finished() {
            break;
        }
    }
    if let Some(frame) = decoder.finish() {
        if let Some(fragment) = accumulator.ingest(&frame) {
            on_fragment(&fragment);
        }
    }
    Ok(accumulator.into_text())
}
