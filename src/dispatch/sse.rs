use serde::Deserialize;
use serde_json::Value;

/// Marker that prefixes every event-data line.
pub const DATA_PREFIX: &str = "data:";
/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event from the chat-completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-empty incremental content from the first choice.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// The payload carried an explicit error object.
    Error(String),
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for `data:` line streams.
///
/// Carries raw bytes, not text, across reads: lines are only decoded once
/// their terminating `\n` has arrived, and `\n` never occurs inside a UTF-8
/// multi-byte sequence, so a character split across two network chunks is
/// always decoded whole.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and drain the frames of every complete line.
    ///
    /// After `[DONE]` the remaining lines of the chunk are discarded and all
    /// later feeds return nothing.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        self.decode_lines(&String::from_utf8_lossy(&complete))
    }

    /// Decode the carried fragment at end of body, as if a final newline arrived.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.finished || self.pending.is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.pending);
        self.decode_lines(&String::from_utf8_lossy(&rest))
    }

    /// True once the sentinel has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn decode_lines(&mut self, text: &str) -> Vec<Frame> {
        let mut frames = Vec::new();
        for line in text.split('\n') {
            let Some(frame) = decode_line(line) else {
                continue;
            };
            let done = frame == Frame::Done;
            frames.push(frame);
            if done {
                self.finished = true;
                self.pending.clear();
                break;
            }
        }
        frames
    }
}

/// Decode a single line. Returns None for blank lines, non-data lines,
/// unparseable payloads and payloads without content.
pub fn decode_line(line: &str) -> Option<Frame> {
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    if payload.is_empty() {
        return None;
    }

    let chunk: ChunkPayload = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable stream line");
            return None;
        }
    };

    if let Some(error) = chunk.error.filter(|e| !e.is_null()) {
        return Some(Frame::Error(error_message(&error)));
    }

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty())
        .map(Frame::Delta)
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("unknown error")
        .to_string()
}
