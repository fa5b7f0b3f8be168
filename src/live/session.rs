//! One live session and the resources it owns.
//!
//! A [`Session`] holds the microphone, the playback scheduler (and through
//! it the output device), the transport and any in-flight tool batch. It is
//! created on open and torn down exactly once, in a fixed order, whether the
//! close came from the user, the ambient trigger or a transport failure.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::state::SessionOrigin;
use super::transport::{InboundMessage, OutboundMessage, Transport, TransportSession};
use crate::audio::scheduler::{Completion, PlaybackUnit};
use crate::audio::{CapturePipeline, Microphone, MicrophoneProvider, PlaybackScheduler, SpeakerProvider, UnitId};
use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::tools::{failed_result, ToolCall, ToolDispatcher, ToolResult};

/// External collaborators a session is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub microphones: Arc<dyn MicrophoneProvider>,
    pub speakers: Arc<dyn SpeakerProvider>,
    pub tools: Arc<ToolDispatcher>,
}

/// Something that happened inside the session, for the controller to route.
pub enum SessionEvent {
    /// The transport handshake finished.
    Connected(Result<TransportSession, LiveError>),
    UnitFinished(UnitId),
    ToolResults(Vec<ToolResult>),
    /// The dispatch task died before answering.
    DispatchFailed(String),
    Inbound(InboundMessage),
}

pub struct Session {
    pub id: Uuid,
    pub origin: SessionOrigin,
    span: Span,
    microphone: Option<Box<dyn Microphone>>,
    scheduler: PlaybackScheduler,
    finished: mpsc::UnboundedReceiver<UnitId>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    connecting: Option<JoinHandle<Result<TransportSession, LiveError>>>,
    transport: Option<TransportSession>,
    dispatch: Option<JoinHandle<Vec<ToolResult>>>,
    pending_calls: Vec<ToolCall>,
    units_played: u64,
    torn_down: bool,
}

impl Session {
    /// Acquire devices and start the transport handshake.
    ///
    /// Device failures are returned directly and leave nothing held. The
    /// handshake result arrives later as [`SessionEvent::Connected`].
    pub fn open(
        origin: SessionOrigin,
        config: &Arc<LiveConfig>,
        deps: &Collaborators,
    ) -> Result<Self, LiveError> {
        let id = Uuid::new_v4();
        let span = info_span!("session", %id, %origin);
        let _enter = span.enter();

        if config.api_key().is_none() {
            return Err(LiveError::MissingApiKey);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let speaker = deps.speakers.open(finished_tx)?;
        let mut scheduler = PlaybackScheduler::new(speaker);

        let pipeline = CapturePipeline::new(
            config.capture_block_size,
            config.input_sample_rate,
            outbound_tx.clone(),
        );
        let microphone = match deps.microphones.acquire(pipeline) {
            Ok(mic) => mic,
            Err(e) => {
                scheduler.release();
                return Err(e);
            }
        };

        let transport = Arc::clone(&deps.transport);
        let transport_config = Arc::clone(config);
        let connecting = tokio::spawn(
            async move { transport.connect(&transport_config, outbound_rx).await }.instrument(span.clone()),
        );

        info!("Devices acquired, connecting");
        drop(_enter);

        Ok(Self {
            id,
            origin,
            span,
            microphone: Some(microphone),
            scheduler,
            finished: finished_rx,
            outbound: outbound_tx,
            connecting: Some(connecting),
            transport: None,
            dispatch: None,
            pending_calls: Vec::new(),
            units_played: 0,
            torn_down: false,
        })
    }

    /// Wait for the next thing that needs the controller's attention.
    ///
    /// Inbound messages are held back while a tool batch is in flight, so a
    /// batch is fully answered before anything after it is processed.
    pub async fn next_event(&mut self) -> SessionEvent {
        let batch_open = self.dispatch.is_some();
        tokio::select! {
            joined = join_slot(&mut self.connecting) => SessionEvent::Connected(
                joined.unwrap_or_else(|e| Err(LiveError::Transport(format!("connect task failed: {e}")))),
            ),
            Some(unit) = self.finished.recv() => SessionEvent::UnitFinished(unit),
            joined = join_slot(&mut self.dispatch) => match joined {
                Ok(results) => SessionEvent::ToolResults(results),
                Err(e) => SessionEvent::DispatchFailed(e.to_string()),
            },
            message = recv_slot(&mut self.transport), if !batch_open => SessionEvent::Inbound(
                message.unwrap_or(InboundMessage::Closed { reason: None }),
            ),
        }
    }

    /// Take ownership of the open transport and start streaming the microphone.
    pub fn on_connected(&mut self, transport: TransportSession) {
        let _enter = self.span.enter();
        self.transport = Some(transport);
        if let Some(mic) = self.microphone.as_mut() {
            mic.start_streaming();
        }
        info!("Session open, microphone streaming");
    }

    /// Decode and schedule one inbound speech frame.
    pub fn play(&mut self, data: &str, sample_rate: u32, channels: u16) -> Result<Option<PlaybackUnit>, LiveError> {
        let chunk = self.scheduler.accept(data, sample_rate, channels)?;
        let unit = self.scheduler.enqueue(chunk)?;
        if let Some(unit) = &unit {
            self.units_played += 1;
            debug!(
                sequence = unit.sequence,
                start = unit.start,
                end = unit.end,
                queued = self.scheduler.active_units(),
                "Speech unit scheduled"
            );
        }
        Ok(unit)
    }

    pub fn unit_finished(&mut self, unit: UnitId) -> Completion {
        self.scheduler.complete(unit)
    }

    /// Barge-in: stop all speech now.
    pub fn interrupt(&mut self) -> usize {
        let _enter = self.span.enter();
        self.scheduler.interrupt()
    }

    /// Run a tool batch off the controller task.
    pub fn start_dispatch(&mut self, calls: Vec<ToolCall>, tools: &Arc<ToolDispatcher>) {
        if calls.is_empty() {
            return;
        }
        self.pending_calls = calls.clone();
        let tools = Arc::clone(tools);
        self.dispatch = Some(tokio::spawn(
            async move { tools.dispatch(calls).await }.instrument(self.span.clone()),
        ));
    }

    /// Queue a finished batch's answers on the transport.
    pub fn send_results(&mut self, results: Vec<ToolResult>) {
        let _enter = self.span.enter();
        let answered = results.len();
        for result in results {
            if self.outbound.send(OutboundMessage::ToolResponse(result)).is_err() {
                warn!("Transport gone, tool response dropped");
            }
        }
        debug!(answered, "Tool responses queued");
        self.pending_calls.clear();
    }

    /// Answer every call of a batch whose dispatch task died.
    pub fn fail_pending(&mut self, reason: &str) {
        let results = self
            .pending_calls
            .iter()
            .map(|call| failed_result(call, reason))
            .collect();
        self.send_results(results);
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Release everything: capture, playback, transport, devices, counters.
    /// Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let _enter = self.span.enter();

        if let Some(mic) = self.microphone.as_mut() {
            mic.stop_streaming();
        }
        self.scheduler.interrupt();

        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(task) = self.dispatch.take() {
            task.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }

        self.scheduler.release();
        if let Some(mut mic) = self.microphone.take() {
            mic.release();
        }

        info!(units_played = self.units_played, "Session torn down");
        self.units_played = 0;
        self.pending_calls.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Await a task held in an optional slot, clearing the slot when it ends.
/// Pending forever when the slot is empty.
async fn join_slot<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    let Some(handle) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let joined = handle.await;
    *slot = None;
    joined
}

async fn recv_slot(slot: &mut Option<TransportSession>) -> Option<InboundMessage> {
    match slot.as_mut() {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}
