//! Live session lifecycle.
//!
//! [`LiveController`] is an actor: one task owns the [`SessionState`] and
//! the current [`Session`], and serializes everything that can change them.
//! That means host commands, transport messages, playback completions and
//! tool results. The host talks to it through a [`LiveHandle`] and hears
//! back through [`LiveNotice`]s.

pub mod gemini;
pub mod session;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::audio::Completion;
use crate::config::LiveConfig;
use crate::error::LiveError;
use session::{Collaborators, Session, SessionEvent};
use state::{SessionOrigin, SessionState};
use transport::InboundMessage;

/// Requests from the host.
#[derive(Debug)]
pub enum ControlCommand {
    Open,
    Close,
    Toggle,
    /// The ambient trigger changed (screensaver active or idle).
    SetAmbient(bool),
    /// Nature mode gates whether the ambient trigger may open a session.
    SetNatureMode(bool),
    /// Reply with the controller's current view once every earlier command
    /// has been handled.
    Query(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// What the controller tells the host.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveNotice {
    Status(SessionState),
    /// User-visible failure: acquisition or transport.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SessionState,
    pub origin: Option<SessionOrigin>,
    pub ambient: bool,
    pub nature_mode: bool,
}

/// Cheap handle for sending commands and reading state.
#[derive(Clone)]
pub struct LiveHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    state: watch::Receiver<SessionState>,
}

impl LiveHandle {
    /// Returns `false` once the controller has stopped.
    pub fn send(&self, command: ControlCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn snapshot(&self) -> Option<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(ControlCommand::Query(tx)).ok()?;
        rx.await.ok()
    }
}

pub struct LiveController {
    config: Arc<LiveConfig>,
    deps: Collaborators,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    state: watch::Sender<SessionState>,
    notices: mpsc::UnboundedSender<LiveNotice>,
    session: Option<Session>,
    ambient: bool,
    nature_mode: bool,
}

impl LiveController {
    pub fn new(
        config: LiveConfig,
        deps: Collaborators,
    ) -> (Self, LiveHandle, mpsc::UnboundedReceiver<LiveNotice>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let controller = Self {
            config: Arc::new(config),
            deps,
            commands: cmd_rx,
            state: state_tx,
            notices: notice_tx,
            session: None,
            ambient: false,
            nature_mode: false,
        };
        let handle = LiveHandle {
            commands: cmd_tx,
            state: state_rx,
        };
        (controller, handle, notice_rx)
    }

    /// Run until `Shutdown` or until every handle is dropped. Any open
    /// session is torn down on the way out.
    pub async fn run(mut self) {
        info!("Live controller running");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = next_session_event(&mut self.session) => self.handle_session_event(event),
            }
        }
        self.close_session(None);
        info!("Live controller stopped");
    }

    fn handle_command(&mut self, command: ControlCommand) {
        debug!(?command, "Control command");
        match command {
            ControlCommand::Open => self.open(SessionOrigin::User),
            ControlCommand::Close => self.close_session(None),
            ControlCommand::Toggle => {
                if self.session.is_some() {
                    self.close_session(None);
                } else {
                    self.open(SessionOrigin::User);
                }
            }
            ControlCommand::SetAmbient(active) => self.set_ambient(active),
            ControlCommand::SetNatureMode(enabled) => self.set_nature_mode(enabled),
            ControlCommand::Query(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop.
            ControlCommand::Shutdown => {}
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: *self.state.borrow(),
            origin: self.session.as_ref().map(|s| s.origin),
            ambient: self.ambient,
            nature_mode: self.nature_mode,
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.current_state();
        if prev == next {
            return;
        }
        if !prev.can_transition_to(next) {
            warn!(from = %prev, to = %next, "Unexpected session state transition");
        }
        self.state.send_replace(next);
        info!(from = %prev, to = %next, "Session state changed");
        let _ = self.notices.send(LiveNotice::Status(next));
    }

    fn report(&self, message: String) {
        warn!(%message, "Reporting session error");
        let _ = self.notices.send(LiveNotice::Error(message));
    }

    fn open(&mut self, origin: SessionOrigin) {
        if let Some(session) = self.session.as_mut() {
            // One session at a time. An explicit open claims an ambient
            // session so the ambient trigger no longer closes it.
            if origin == SessionOrigin::User && session.origin == SessionOrigin::Ambient {
                session.origin = SessionOrigin::User;
                info!(session = %session.id, "Ambient session claimed by user");
            } else {
                debug!(session = %session.id, "Open ignored, session already active");
            }
            return;
        }

        self.set_state(SessionState::Connecting);
        match Session::open(origin, &self.config, &self.deps) {
            Ok(session) => {
                info!(session = %session.id, %origin, "Session opening");
                self.session = Some(session);
            }
            Err(e) => {
                if !e.is_acquisition() {
                    warn!(error = %e, "Unexpected failure while opening session");
                }
                self.set_state(SessionState::Disconnected);
                self.report(acquisition_message(&e));
            }
        }
    }

    /// Tear down the current session, if any, then surface `error`.
    fn close_session(&mut self, error: Option<String>) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
            self.set_state(SessionState::Disconnected);
        }
        if let Some(message) = error {
            self.report(message);
        }
    }

    fn set_ambient(&mut self, active: bool) {
        let was_active = std::mem::replace(&mut self.ambient, active);
        if active == was_active {
            return;
        }
        debug!(active, "Ambient trigger changed");
        if active {
            self.maybe_auto_open();
        } else if self.session.as_ref().map(|s| s.origin) == Some(SessionOrigin::Ambient) {
            info!("Ambient trigger inactive, closing ambient session");
            self.close_session(None);
        }
    }

    fn set_nature_mode(&mut self, enabled: bool) {
        let was_enabled = std::mem::replace(&mut self.nature_mode, enabled);
        if enabled && !was_enabled {
            self.maybe_auto_open();
        }
    }

    fn maybe_auto_open(&mut self) {
        if self.ambient && self.nature_mode && self.session.is_none() {
            info!("Ambient trigger opening session");
            self.open(SessionOrigin::Ambient);
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected(Ok(transport)) => {
                if let Some(session) = self.session.as_mut() {
                    session.on_connected(transport);
                    self.set_state(SessionState::Connected);
                }
            }
            SessionEvent::Connected(Err(e)) => {
                self.close_session(Some(format!("Could not connect: {e}")));
            }
            SessionEvent::UnitFinished(unit) => {
                let Some(session) = self.session.as_mut() else { return };
                if session.unit_finished(unit) == Completion::Drained
                    && self.current_state() == SessionState::Speaking
                {
                    self.set_state(SessionState::Connected);
                }
            }
            SessionEvent::ToolResults(results) => {
                if let Some(session) = self.session.as_mut() {
                    session.send_results(results);
                }
            }
            SessionEvent::DispatchFailed(reason) => {
                if let Some(session) = self.session.as_mut() {
                    warn!(%reason, "Tool dispatch failed");
                    session.fail_pending(&reason);
                }
            }
            SessionEvent::Inbound(message) => self.handle_inbound(message),
        }
    }

    fn handle_inbound(&mut self, message: InboundMessage) {
        let Some(session) = self.session.as_mut() else { return };
        let span = session.span().clone();
        let _enter = span.enter();

        match message {
            InboundMessage::Audio {
                data,
                sample_rate,
                channels,
            } => match session.play(&data, sample_rate, channels) {
                Ok(Some(_)) => {
                    if self.current_state() == SessionState::Connected {
                        self.set_state(SessionState::Speaking);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_malformed_inbound() => {
                    warn!(error = %e, "Dropping malformed speech frame");
                }
                Err(e) => warn!(error = %e, "Output refused speech frame"),
            },
            InboundMessage::ToolCalls(calls) => {
                info!(count = calls.len(), "Tool call batch received");
                session.start_dispatch(calls, &self.deps.tools);
            }
            InboundMessage::Interrupted => {
                let stopped = session.interrupt();
                debug!(stopped, "Interrupted by user");
                if self.current_state() == SessionState::Speaking {
                    self.set_state(SessionState::Connected);
                }
            }
            InboundMessage::TurnComplete => debug!("Agent turn complete"),
            InboundMessage::ToolCallCancellation(ids) => {
                info!(?ids, "Agent cancelled tool calls");
            }
            InboundMessage::GoAway { time_left } => {
                warn!(?time_left, "Server requested disconnect soon");
            }
            InboundMessage::Closed { reason } => {
                info!(?reason, "Transport closed");
                drop(_enter);
                self.close_session(reason.map(|r| format!("Session closed: {r}")));
            }
            InboundMessage::Error(message) => {
                drop(_enter);
                self.close_session(Some(format!("Connection error: {message}")));
            }
        }
    }
}

fn acquisition_message(e: &LiveError) -> String {
    match e {
        LiveError::MissingApiKey => "No API key configured. Set GEMINI_API_KEY or apiKey in live_config.json.".into(),
        LiveError::Microphone(detail) => format!("Microphone unavailable: {detail}"),
        LiveError::Output(detail) => format!("Audio output unavailable: {detail}"),
        other => other.to_string(),
    }
}

async fn next_session_event(session: &mut Option<Session>) -> SessionEvent {
    match session.as_mut() {
        Some(session) => session.next_event().await,
        None => std::future::pending().await,
    }
}
