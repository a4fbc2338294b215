//! Outbound event stream to the caller.
//!
//! The pipeline only ever talks to [`StreamChannel`]; the transport (SSE,
//! terminal, test receiver) belongs to whoever constructs the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ml_core::types::PipelinePhase;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abort::AbortSignal;

/// Event kind used for incremental response text.
pub const DELTA_EVENT: &str = "delta";

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress {
        phase: PipelinePhase,
        message: String,
    },
    Event {
        kind: String,
        payload: serde_json::Value,
    },
    Result {
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Text carried by a delta event, if this is one.
    pub fn delta_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Event { kind, payload } if kind == DELTA_EVENT => {
                payload.get("text").and_then(|t| t.as_str())
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamChannel trait
// ---------------------------------------------------------------------------

/// Live channel to the caller. Sends are best-effort: a closed or
/// disconnected channel swallows them.
#[async_trait]
pub trait StreamChannel: Send + Sync {
    /// True once the caller aborted or went away.
    fn is_aborted(&self) -> bool;

    /// The signal backing [`is_aborted`](Self::is_aborted), for `select!`.
    fn abort_signal(&self) -> AbortSignal;

    async fn send_progress(&self, phase: PipelinePhase, message: &str);

    async fn send_event(&self, kind: &str, payload: serde_json::Value);

    async fn send_result(&self, payload: serde_json::Value);

    async fn send_error(&self, message: &str);

    async fn close(&self);
}

// ---------------------------------------------------------------------------
// ChannelStream
// ---------------------------------------------------------------------------

/// [`StreamChannel`] backed by an unbounded flume channel.
///
/// Dropping the receiver counts as a client disconnect and aborts the
/// stream. `close` drops the sender so the receiver observes end-of-stream.
#[derive(Debug)]
pub struct ChannelStream {
    sender: Mutex<Option<flume::Sender<StreamEvent>>>,
    abort: AbortSignal,
    closed: AtomicBool,
}

impl ChannelStream {
    pub fn new() -> (Self, flume::Receiver<StreamEvent>) {
        Self::with_abort(AbortSignal::new())
    }

    /// Channel that aborts when `abort` fires.
    pub fn with_abort(abort: AbortSignal) -> (Self, flume::Receiver<StreamEvent>) {
        let (tx, rx) = flume::unbounded();
        (
            Self {
                sender: Mutex::new(Some(tx)),
                abort,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, event: StreamEvent) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("stream receiver dropped, aborting");
                    self.abort.abort();
                }
            }
            None => debug!("send on closed stream ignored"),
        }
    }
}

#[async_trait]
impl StreamChannel for ChannelStream {
    fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    async fn send_progress(&self, phase: PipelinePhase, message: &str) {
        self.send(StreamEvent::Progress {
            phase,
            message: message.to_string(),
        });
    }

    async fn send_event(&self, kind: &str, payload: serde_json::Value) {
        self.send(StreamEvent::Event {
            kind: kind.to_string(),
            payload,
        });
    }

    async fn send_result(&self, payload: serde_json::Value) {
        self.send(StreamEvent::Result { payload });
    }

    async fn send_error(&self, message: &str) {
        self.send(StreamEvent::Error {
            message: message.to_string(),
        });
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (stream, rx) = ChannelStream::new();
        stream
            .send_progress(PipelinePhase::Sensing, "Understanding how you feel...")
            .await;
        stream.send_event(DELTA_EVENT, json!({ "text": "Hi" })).await;
        stream.send_result(json!({ "response": "Hi" })).await;
        stream.close().await;

        let events: Vec<StreamEvent> = rx.drain().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            StreamEvent::Progress { phase: PipelinePhase::Sensing, .. }
        ));
        assert_eq!(events[1].delta_text(), Some("Hi"));
        assert!(matches!(events[2], StreamEvent::Result { .. }));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (stream, rx) = ChannelStream::new();
        stream.close().await;
        stream.send_error("late").await;
        assert!(stream.is_closed());
        assert!(rx.recv_async().await.is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_aborts() {
        let (stream, rx) = ChannelStream::new();
        drop(rx);
        assert!(!stream.is_aborted());
        stream.send_error("anyone?").await;
        assert!(stream.is_aborted());
    }

    #[tokio::test]
    async fn external_abort_is_visible() {
        let signal = AbortSignal::new();
        let (stream, _rx) = ChannelStream::with_abort(signal.clone());
        signal.abort();
        assert!(stream.is_aborted());
        assert!(stream.abort_signal().is_aborted());
    }

    #[test]
    fn stream_event_serializes_with_type_tag() {
        let event = StreamEvent::Error {
            message: "boom".into(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["message"], "boom");
    }
}
