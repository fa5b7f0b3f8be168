//! Structured logging setup.
//!
//! - File output: rolling log files in `{data_dir}/logs/live-core.log`,
//!   rotated daily, keeping the latest 5 files.
//! - Console output on stderr. Stdout carries the IPC stream and must stay
//!   clean.
//! - Environment filter from `RUST_LOG`, defaulting to `info`.

use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::paths::get_log_dir;

/// Filter used when `RUST_LOG` is unset. Websocket and HTTP internals are
/// chatty at debug level.
const DEFAULT_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn,reqwest=warn,hyper=warn,mio=warn";

/// Install the global subscriber.
///
/// A log directory that cannot be created degrades to stderr only. Fails if a
/// subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    let log_dir = get_log_dir();

    let file_layer = match fs::create_dir_all(&log_dir)
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("live-core")
                .filename_suffix("log")
                .max_log_files(5)
                .build(&log_dir)
                .map_err(anyhow::Error::from)
        }) {
        Ok(appender) => Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("File logging disabled ({}): {e}", log_dir.display());
            None
        }
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}
