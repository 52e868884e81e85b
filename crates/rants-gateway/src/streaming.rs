//! Streaming assembler: renders the internal event stream as external wire
//! dialects, and guarantees that no client ever observes a `TOOL_INTENT:`
//! line in streamed text.

use serde_json::{json, Value};

use crate::engine::TOOL_INTENT_PREFIX;
use crate::events::SessionEvent;

/// Line-oriented lookahead over generator deltas.
///
/// Text is released as soon as the current line can no longer match
/// `^TOOL_INTENT:`; lines that do match are swallowed whole. The buffered
/// state never exceeds the intent prefix itself, which keeps the assembler
/// memory bound far under `len(prefix) + max_intent_line_bytes`.
#[derive(Debug)]
pub struct IntentScanner {
    state: LineState,
}

#[derive(Debug)]
enum LineState {
    /// Line so far is a (possibly empty) strict prefix of `TOOL_INTENT:`.
    Undecided(String),
    /// Line started with `TOOL_INTENT:`; swallow it up to the newline.
    Intent,
    /// Line can never be an intent line; pass bytes straight through.
    Passthrough,
}

impl Default for IntentScanner {
    fn default() -> Self {
        Self {
            state: LineState::Undecided(String::new()),
        }
    }
}

impl IntentScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta and return the text that is now safe to emit.
    pub fn feed(&mut self, chunk: &str) -> String {
        let mut emitted = String::new();
        for character in chunk.chars() {
            match &mut self.state {
                LineState::Undecided(buffer) => {
                    if character == '\n' {
                        emitted.push_str(buffer);
                        emitted.push('\n');
                        self.state = LineState::Undecided(String::new());
                        continue;
                    }
                    buffer.push(character);
                    if buffer == TOOL_INTENT_PREFIX {
                        self.state = LineState::Intent;
                    } else if !TOOL_INTENT_PREFIX.starts_with(buffer.as_str()) {
                        emitted.push_str(buffer);
                        self.state = LineState::Passthrough;
                    }
                }
                LineState::Intent => {
                    if character == '\n' {
                        self.state = LineState::Undecided(String::new());
                    }
                }
                LineState::Passthrough => {
                    emitted.push(character);
                    if character == '\n' {
                        self.state = LineState::Undecided(String::new());
                    }
                }
            }
        }
        emitted
    }

    /// End of generation: release a withheld non-intent tail, drop a
    /// trailing intent line.
    pub fn finish(self) -> String {
        match self.state {
            LineState::Undecided(buffer) => buffer,
            LineState::Intent | LineState::Passthrough => String::new(),
        }
    }
}

/// One `data:` frame of the `/v1/responses` SSE dialect.
#[derive(Clone, Debug, PartialEq)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    fn event(payload: Value) -> Self {
        Self {
            data: payload.to_string(),
        }
    }
}

/// Renders session events as `/v1/responses` SSE frames. Tool-phase events
/// are intentionally not forwarded; no `response.reasoning.*` frame exists.
#[derive(Debug, Default)]
pub struct ResponsesSseEncoder {
    sequence: u64,
    item_id: String,
    text: String,
}

impl ResponsesSseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &SessionEvent) -> Vec<SseFrame> {
        match event {
            SessionEvent::Started { response, .. } => {
                self.item_id = response
                    .output
                    .first()
                    .map(|message| message.id.clone())
                    .unwrap_or_else(|| "msg_0".to_string());
                vec![self.frame(json!({
                    "type": "response.created",
                    "response": response,
                }))]
            }
            SessionEvent::TextDelta { delta } => {
                self.text.push_str(delta);
                vec![self.frame(json!({
                    "type": "response.output_text.delta",
                    "output_index": 0,
                    "item_id": self.item_id,
                    "content_index": 0,
                    "delta": delta,
                    "logprobs": [],
                }))]
            }
            SessionEvent::TextDone => {
                vec![self.frame(json!({
                    "type": "response.output_text.done",
                    "output_index": 0,
                    "item_id": self.item_id,
                    "content_index": 0,
                    "text": self.text,
                    "logprobs": [],
                }))]
            }
            SessionEvent::Completed { response } => {
                vec![self.frame(json!({
                    "type": "response.completed",
                    "response": response,
                }))]
            }
            SessionEvent::Failed { kind, message } => {
                vec![self.frame(json!({
                    "type": "response.failed",
                    "error": {
                        "code": kind.as_str(),
                        "message": message,
                    },
                }))]
            }
            SessionEvent::ToolPhaseStarted { .. } | SessionEvent::ToolPhaseDone => Vec::new(),
        }
    }

    fn frame(&mut self, mut payload: Value) -> SseFrame {
        payload["sequence_number"] = json!(self.sequence);
        self.sequence += 1;
        SseFrame::event(payload)
    }
}

/// Fixed-size text chunking used by the chat-completions stream.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for character in text.chars() {
        current.push(character);
        if current.len() >= chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
