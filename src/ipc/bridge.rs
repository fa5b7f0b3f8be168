//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events go out as JSON lines on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{LiveCommand, LiveEvent};
use crate::tools::{AppAction, AppStateSink};

/// Emit a `LiveEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &LiveEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

/// Convenience helper for emitting error events.
pub fn emit_error(message: &str) {
    emit_event(&LiveEvent::Error {
        message: message.to_string(),
    });
}

/// Forwards tool-driven setters to the host as `app_action` events.
pub struct IpcAppState;

impl AppStateSink for IpcAppState {
    fn apply(&self, action: AppAction) {
        emit_event(&LiveEvent::AppAction { action });
    }
}

/// If a line has `"type"` but no `"command"`, rename `"type"` to `"command"`
/// so serde can deserialize it.
fn normalize_command_json(input: &str) -> String {
    if let Ok(mut obj) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(input) {
        if !obj.contains_key("command") {
            if let Some(type_val) = obj.remove("type") {
                obj.insert("command".to_string(), type_val);
                if let Ok(json) = serde_json::to_string(&obj) {
                    return json;
                }
            }
        }
    }
    input.to_string()
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
fn parse_line(line: &str) -> Result<Option<LiveCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&normalize_command_json(trimmed)).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin, deserializes
/// them into `LiveCommand`, and forwards them through the returned channel.
///
/// The thread exits when stdin is closed (host gone) or on an
/// unrecoverable read error.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<LiveCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => match parse_line(&text) {
                    Ok(Some(cmd)) => {
                        debug!(?cmd, "Received command from host");
                        if tx.send(cmd).is_err() {
                            break; // Main task is gone.
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Invalid JSON command: {} (input: {})", e, text.trim());
                        emit_error(&format!("Invalid JSON command: {}", e));
                    }
                },
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
