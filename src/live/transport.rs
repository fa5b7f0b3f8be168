//! Transport seam between the session engine and the remote agent.
//!
//! The engine only sees typed messages: outbound audio and tool responses
//! go into an unbounded queue, inbound speech, tool calls, interruptions and
//! close/error notifications come out of a bounded receiver.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::tools::{ToolCall, ToolResult};

/// Messages the engine sends to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// One captured block, PCM16 and transport-encoded.
    RealtimeAudio { mime_type: String, data: String },
    /// Answer to one tool call.
    ToolResponse(ToolResult),
}

/// Messages the agent sends to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Synthesized speech, transport-encoded PCM16.
    Audio {
        data: String,
        sample_rate: u32,
        channels: u16,
    },
    ToolCalls(Vec<ToolCall>),
    /// The agent withdrew calls it had issued.
    ToolCallCancellation(Vec<String>),
    /// The user barged in; stop talking.
    Interrupted,
    TurnComplete,
    /// The server asked us to wind down soon.
    GoAway { time_left: Option<Value> },
    Closed { reason: Option<String> },
    Error(String),
}

type CloseFn = Box<dyn FnOnce() + Send>;

/// An open connection to the agent.
///
/// Dropping the session closes it; `close` may be called any number of times.
pub struct TransportSession {
    inbound: mpsc::Receiver<InboundMessage>,
    on_close: Option<CloseFn>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportSession {
    pub fn new(
        inbound: mpsc::Receiver<InboundMessage>,
        on_close: impl FnOnce() + Send + 'static,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            inbound,
            on_close: Some(Box::new(on_close)),
            tasks,
        }
    }

    /// Next inbound message; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.inbound.recv().await
    }

    pub fn close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
        self.inbound.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Something that can open agent sessions (dyn-compatible).
///
/// `outbound` is the queue the capture pipeline and tool dispatcher write
/// into; the transport drains it in order once the session is open.
pub trait Transport: Send + Sync {
    fn connect<'a>(
        &'a self,
        config: &'a LiveConfig,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<TransportSession, LiveError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_close_runs_once_and_ends_inbound() {
        let (tx, rx) = mpsc::channel(4);
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        let mut session = TransportSession::new(
            rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Vec::new(),
        );

        tx.send(InboundMessage::TurnComplete).await.unwrap();
        assert_eq!(session.recv().await, Some(InboundMessage::TurnComplete));

        session.close();
        session.close();
        assert!(tx.send(InboundMessage::Interrupted).await.is_err());
        assert_eq!(session.recv().await, None);

        drop(session);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_aborts_tasks() {
        let (_tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(std::future::pending::<()>());
        let session = TransportSession::new(rx, || {}, vec![task]);
        drop(session);
    }
}
