//! IPC protocol types for communication with the host UI.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::live::state::SessionState;
use crate::live::ControlCommand;
use crate::tools::AppAction;

// ---------------------------------------------------------------------------
// Events: core -> host (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the host via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LiveEvent {
    Starting {},
    Ready {},
    LiveStatus { state: SessionState },
    AppAction { action: AppAction },
    Error { message: String },
    Pong {
        state: SessionState,
        ambient: bool,
        nature_mode: bool,
    },
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: host -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the host via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum LiveCommand {
    OpenLive {},
    CloseLive {},
    ToggleLive {},
    SetAmbient { active: bool },
    SetNatureMode { enabled: bool },
    Ping {},
    Stop {},
}

impl LiveCommand {
    /// The controller command this maps to. `ping` and `stop` are answered
    /// by the main loop and have no direct counterpart.
    pub fn to_control(&self) -> Option<ControlCommand> {
        match self {
            Self::OpenLive {} => Some(ControlCommand::Open),
            Self::CloseLive {} => Some(ControlCommand::Close),
            Self::ToggleLive {} => Some(ControlCommand::Toggle),
            Self::SetAmbient { active } => Some(ControlCommand::SetAmbient(*active)),
            Self::SetNatureMode { enabled } => Some(ControlCommand::SetNatureMode(*enabled)),
            Self::Ping {} | Self::Stop {} => None,
        }
    }
}
