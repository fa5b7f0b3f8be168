//! Session state machine values.

use serde::Serialize;

/// Connection state of the live session, as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session; no devices held.
    #[default]
    Disconnected,
    /// Devices acquired, transport handshake in flight.
    Connecting,
    /// Session open, microphone streaming, agent silent.
    Connected,
    /// At least one speech unit scheduled or playing.
    Speaking,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Speaking)
                | (Speaking, Connected)
                | (Connecting | Connected | Speaking, Disconnected)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// What opened the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Explicit open or toggle from the user. Never auto-closed.
    User,
    /// The ambient trigger became active with nature mode on.
    Ambient,
}

impl std::fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Ambient => write!(f, "ambient"),
        }
    }
}
