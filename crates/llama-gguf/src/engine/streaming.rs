//! Server-Sent Events parsing for llama-server's `/completion` stream.
//!
//! With `"stream": true`, llama-server answers with `data:` lines, each a
//! JSON object carrying a `content` delta. The last object has
//! `"stop": true` plus generation statistics.
//!
//! [`SseDecoder`] turns raw body chunks into [`StreamEvent`]s. It buffers
//! bytes rather than text so multi-byte characters split across network
//! chunks decode correctly.

use serde::Deserialize;
use tracing::{trace, warn};

/// A single event from the completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A generated text chunk.
    Token(String),
    /// Generation finished.
    Done(Option<StopInfo>),
    /// The server reported an error mid-stream.
    Error(String),
}

/// Statistics sent with the final chunk.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StopInfo {
    #[serde(default)]
    pub tokens_predicted: Option<u64>,
    #[serde(default)]
    pub tokens_evaluated: Option<u64>,
    #[serde(default)]
    pub stop_type: Option<String>,
    #[serde(default)]
    pub truncated: Option<bool>,
}

/// Raw `data:` payload.
#[derive(Deserialize, Debug)]
struct CompletionChunk {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    error: Option<ChunkError>,
    #[serde(flatten)]
    info: StopInfo,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ChunkError {
    Object { message: String },
    Text(String),
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a body chunk, appending any complete events to `events`.
    pub fn push(&mut self, chunk: &[u8], events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line), events);
            if self.done {
                self.buffer.clear();
                return;
            }
        }
    }

    /// Flush a trailing line without a newline and make sure the stream
    /// ends with [`StreamEvent::Done`] or [`StreamEvent::Error`].
    pub fn finish(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.handle_line(&String::from_utf8_lossy(&rest), events);
        }
        if !self.done {
            self.done = true;
            events.push(StreamEvent::Done(None));
        }
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            trace!("Ignoring SSE field: {line}");
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done(None));
            return;
        }
        let before = events.len();
        parse_completion_data(data, events);
        if events[before..]
            .iter()
            .any(|e| matches!(e, StreamEvent::Done(_) | StreamEvent::Error(_)))
        {
            self.done = true;
        }
    }
}

/// Parse one `data:` payload into stream events. A final chunk that still
/// carries text yields the token before the `Done` event.
fn parse_completion_data(data: &str, events: &mut Vec<StreamEvent>) {
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                let message = match err {
                    ChunkError::Object { message } => message,
                    ChunkError::Text(message) => message,
                };
                events.push(StreamEvent::Error(message));
                return;
            }
            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                events.push(StreamEvent::Token(content));
            }
            if chunk.stop {
                trace!("Stream stop: {:?}", chunk.info.stop_type);
                events.push(StreamEvent::Done(Some(chunk.info)));
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
        }
    }
}
