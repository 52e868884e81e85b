//! Internal event stream shared by both streaming dialects.
//!
//! The orchestrator emits these as the loop runs; the HTTP layer renders
//! them as `/v1/responses` SSE or `/v1/chat/completions` chunks. A sink
//! that reports a dead receiver is how client disconnects reach the loop.

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::response::ResponseObject;

#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Loop started; carries the in-progress response skeleton so the
    /// `response.created` frame can be emitted before any generation.
    Started {
        session_id: Uuid,
        response: Box<ResponseObject>,
    },
    TextDelta { delta: String },
    TextDone,
    ToolPhaseStarted { tools: Vec<String> },
    ToolPhaseDone,
    Completed { response: Box<ResponseObject> },
    Failed { kind: ErrorKind, message: String },
}

pub trait EventSink: Send + Sync {
    /// Deliver one event. Returning `false` means nobody is listening any
    /// more; the orchestrator treats that as client disconnect.
    fn emit(&self, event: SessionEvent) -> bool;
}

/// Sink for non-streaming requests: accepts everything, observes nothing.
#[derive(Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SessionEvent) -> bool {
        true
    }
}

pub struct ChannelEventSink {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelEventSink {
    pub fn pair() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SessionEvent) -> bool {
        self.tx.unbounded_send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn channel_sink_reports_dropped_receiver() {
        let (sink, rx) = ChannelEventSink::pair();
        assert!(sink.emit(SessionEvent::TextDone));
        drop(rx);
        assert!(!sink.emit(SessionEvent::TextDone));
    }
}
