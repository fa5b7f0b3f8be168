//! live-core: real-time voice session engine for the particle visualizer.
//!
//! Communicates with the host UI via JSON-line IPC on stdin/stdout. This is
//! the entry point that wires the audio devices, the Gemini Live transport
//! and the tool dispatcher into the session controller, then relays
//! commands in and events out.

mod audio;
mod config;
mod error;
mod ipc;
mod live;
mod logger;
mod tools;

use std::sync::Arc;

use tracing::{info, warn};

use audio::{CpalMicrophones, RodioSpeakers};
use config::read_live_config;
use ipc::bridge::{emit_event, spawn_stdin_reader, IpcAppState};
use ipc::{LiveCommand, LiveEvent};
use live::gemini::GeminiLiveTransport;
use live::session::Collaborators;
use live::{ControlCommand, LiveController, LiveHandle, LiveNotice};
use tools::system_info::OpenMeteoWeather;
use tools::ToolDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logger::init() {
        eprintln!("Failed to initialize logging: {e}");
    }

    // Emit starting event immediately so the host knows we're alive.
    emit_event(&LiveEvent::Starting {});

    let config = read_live_config();
    info!(
        model = %config.model,
        voice = %config.voice_name,
        has_api_key = config.api_key().is_some(),
        "Configuration loaded"
    );

    let weather = OpenMeteoWeather::new(config.location_enabled, config.fixed_location());
    let deps = Collaborators {
        transport: Arc::new(GeminiLiveTransport),
        microphones: Arc::new(CpalMicrophones::new(
            config.input_device.clone(),
            config.input_sample_rate,
        )),
        speakers: Arc::new(RodioSpeakers::new(config.output_device.clone())),
        tools: Arc::new(ToolDispatcher::new(
            Arc::new(IpcAppState),
            Arc::new(weather),
            config.lookup_timeout(),
        )),
    };

    let (controller, handle, mut notices) = LiveController::new(config, deps);
    let controller_task = tokio::spawn(controller.run());

    // Blocking thread -> async channel
    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&LiveEvent::Ready {});
    info!("Live core ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(command, &handle).await {
                            break;
                        }
                    }
                    None => {
                        // stdin closed: host process gone
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            notice = notices.recv() => {
                match notice {
                    Some(notice) => forward_notice(notice),
                    None => break,
                }
            }
        }
    }

    handle.send(ControlCommand::Shutdown);
    controller_task.await?;
    while let Ok(notice) = notices.try_recv() {
        forward_notice(notice);
    }

    info!(state = %handle.state(), "Live core shutting down");
    Ok(())
}

/// Handle a single command from the host.
/// Returns `false` if the main loop should exit.
async fn handle_command(cmd: LiveCommand, handle: &LiveHandle) -> bool {
    match cmd {
        LiveCommand::Ping {} => {
            let Some(snapshot) = handle.snapshot().await else {
                return false;
            };
            emit_event(&LiveEvent::Pong {
                state: snapshot.state,
                ambient: snapshot.ambient,
                nature_mode: snapshot.nature_mode,
            });
        }

        LiveCommand::Stop {} => {
            emit_event(&LiveEvent::Stopping {});
            return false;
        }

        other => {
            let Some(control) = other.to_control() else {
                return true;
            };
            if !handle.send(control) {
                warn!("Live controller stopped unexpectedly");
                return false;
            }
        }
    }

    true
}

fn forward_notice(notice: LiveNotice) {
    match notice {
        LiveNotice::Status(state) => emit_event(&LiveEvent::LiveStatus { state }),
        LiveNotice::Error(message) => emit_event(&LiveEvent::Error { message }),
    }
}
