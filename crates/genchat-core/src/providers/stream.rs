//! Incremental decoding of line-delimited streaming bodies
//!
//! Backends stream either server-sent events (`data: {...}`) or bare
//! newline-delimited JSON. Both reduce to the same unit: one line holding one
//! JSON object. [`FrameDecoder`] buffers raw bytes until a full line is
//! available, so units split across reads (including mid UTF-8 sequence)
//! decode exactly as if they had arrived in one read.

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::error::SdkError;
use crate::request::{BackendKind, EventStream, StreamEvent, TokenUsage};

/// A decoded unit
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Payload(Value),
    /// The `[DONE]` sentinel
    Done,
}

/// Parser state: accumulated bytes plus a cursor over the consumed prefix
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    cursor: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one read from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        if self.cursor == self.buf.len() {
            self.buf.clear();
            self.cursor = 0;
        } else if self.cursor > self.buf.len() / 2 {
            self.buf.drain(..self.cursor);
            self.cursor = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete unit, skipping blank, non-data and malformed lines.
    /// `None` means more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let pending = &self.buf[self.cursor..];
            let newline = pending.iter().position(|b| *b == b'\n')?;
            let frame = decode_line(&pending[..newline]);
            self.cursor += newline + 1;
            if frame.is_some() {
                return frame;
            }
        }
    }

    /// Decode whatever trailing partial line is left once the transport closes
    pub fn finish(&mut self) -> Option<Frame> {
        if self.cursor >= self.buf.len() {
            return None;
        }
        let frame = decode_line(&self.buf[self.cursor..]);
        self.cursor = self.buf.len();
        frame
    }

    /// Bytes received but not yet consumed
    pub fn pending(&self) -> usize {
        self.buf.len() - self.cursor
    }
}

fn decode_line(line: &[u8]) -> Option<Frame> {
    let Ok(text) = std::str::from_utf8(line) else {
        debug!("Skipping non-UTF-8 stream unit ({} bytes)", line.len());
        return None;
    };
    let text = text.trim();
    if text.is_empty() || text.starts_with(':') {
        return None;
    }

    let data = match text.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None if is_sse_field(text) => return None,
        None => text,
    };
    if data == "[DONE]" {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<Value>(data) {
        Ok(value) if value.is_object() => Some(Frame::Payload(value)),
        _ => {
            debug!("Skipping malformed stream unit ({} bytes)", data.len());
            None
        }
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}

/// What a backend-specific mapper extracts from one decoded payload
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Unit {
    pub text: String,
    pub done: bool,
    pub tokens: Option<TokenUsage>,
}

/// Maps one decoded payload. `Ok(None)` skips a payload of the wrong shape;
/// `Err` is an error reported by the backend inside the stream.
pub(crate) type UnitMapper = fn(&Value) -> Result<Option<Unit>, SdkError>;

/// Turn a byte stream into normalized events.
///
/// Ends at `[DONE]` or when the body closes. If the last event emitted was
/// not terminal, a synthetic terminal event is appended. A transport error,
/// or an error event sent by the backend, surfaces as one `API_ERROR` item
/// and ends the stream.
pub(crate) fn decode_events<S, B, E>(provider: BackendKind, body: S, map: UnitMapper) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = FrameDecoder::new();
        let mut last_done = false;
        let mut finished = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                SdkError::api(
                    format!("{} streaming error: {}", provider.label(), e),
                    provider.as_str(),
                )
            })?;
            decoder.push(chunk.as_ref());

            while let Some(frame) = decoder.next_frame() {
                match frame {
                    Frame::Done => {
                        finished = true;
                        break;
                    }
                    Frame::Payload(raw) => {
                        if let Some(event) = to_event(provider, map, raw)? {
                            last_done = event.done;
                            yield event;
                        }
                    }
                }
            }

            if finished {
                break;
            }
        }

        if !finished {
            if let Some(Frame::Payload(raw)) = decoder.finish() {
                if let Some(event) = to_event(provider, map, raw)? {
                    last_done = event.done;
                    yield event;
                }
            }
        }

        if !last_done {
            yield StreamEvent::terminal(provider);
        }
    })
}

fn to_event(
    provider: BackendKind,
    map: UnitMapper,
    raw: Value,
) -> Result<Option<StreamEvent>, SdkError> {
    let Some(unit) = map(&raw)? else {
        debug!("Skipping {} stream unit with unexpected shape", provider);
        return Ok(None);
    };
    Ok(Some(StreamEvent {
        text: unit.text,
        done: unit.done,
        tokens: unit.tokens,
        raw,
        provider,
    }))
}
