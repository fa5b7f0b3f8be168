//! Audio output via rodio.
//!
//! Every scheduled unit gets its own `Sink` on a shared output stream: the
//! decoded samples sit behind a delay equal to the unit's start offset, and a
//! trailing callback source reports the unit id once the samples are spent.
//! Stopping a unit stops its sink, which also silences a unit that has not
//! started yet.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::codec::PcmFrame;
use crate::error::LiveError;

/// Handle to one scheduled unit, unique within a session.
pub type UnitId = u64;

/// The output side of a session: a clock plus start-at scheduling.
pub trait Speaker: Send {
    /// Current position of the output timeline, in seconds.
    fn now(&self) -> f64;

    /// Queue `frame` to begin at `start_at` on the output timeline.
    fn schedule(&mut self, unit: UnitId, frame: &PcmFrame, start_at: f64) -> Result<(), LiveError>;

    /// Stop a unit immediately. A unit that already finished is a no-op.
    fn stop(&mut self, unit: UnitId);

    /// Dispose of a unit that finished on its own.
    fn retire(&mut self, unit: UnitId);

    /// Stop everything and close the device. Idempotent.
    fn release(&mut self);
}

/// Opens output devices for new sessions.
///
/// Each finished unit is reported on `finished` exactly once, unless it was
/// stopped first.
pub trait SpeakerProvider: Send + Sync {
    fn open(&self, finished: mpsc::UnboundedSender<UnitId>) -> Result<Box<dyn Speaker>, LiveError>;
}

/// Wrapper to make rodio's `OutputStream` Send.
///
/// Same reasoning as the capture stream: it is only kept alive and dropped.
struct SendOutput(#[allow(dead_code)] OutputStream);

// SAFETY: the stream is never accessed after creation, only dropped.
unsafe impl Send for SendOutput {}

/// rodio-backed speaker.
pub struct RodioSpeaker {
    stream: Option<SendOutput>,
    handle: OutputStreamHandle,
    sinks: HashMap<UnitId, Sink>,
    origin: Instant,
    finished: mpsc::UnboundedSender<UnitId>,
}

impl Speaker for RodioSpeaker {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, unit: UnitId, frame: &PcmFrame, start_at: f64) -> Result<(), LiveError> {
        if self.stream.is_none() {
            return Err(LiveError::Output("output device already released".into()));
        }
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| LiveError::Output(format!("failed to create audio sink: {e}")))?;

        let delay = Duration::from_secs_f64((start_at - self.now()).max(0.0));
        let channels = frame.channels.len().max(1) as u16;
        let source = SamplesBuffer::new(channels, frame.sample_rate, frame.interleaved());
        sink.append(source.delay(delay));

        let finished = self.finished.clone();
        sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            let _ = finished.send(unit);
        })));

        debug!(unit, delay_ms = delay.as_millis() as u64, "Unit queued");
        self.sinks.insert(unit, sink);
        Ok(())
    }

    fn stop(&mut self, unit: UnitId) {
        if let Some(sink) = self.sinks.remove(&unit) {
            sink.stop();
        }
    }

    fn retire(&mut self, unit: UnitId) {
        self.sinks.remove(&unit);
    }

    fn release(&mut self) {
        for (_, sink) in self.sinks.drain() {
            sink.stop();
        }
        if self.stream.take().is_some() {
            info!("Audio output released");
        }
    }
}

impl Drop for RodioSpeaker {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens rodio output streams on the default or a named device.
pub struct RodioSpeakers {
    device_name: Option<String>,
}

impl RodioSpeakers {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl SpeakerProvider for RodioSpeakers {
    fn open(&self, finished: mpsc::UnboundedSender<UnitId>) -> Result<Box<dyn Speaker>, LiveError> {
        let (stream, handle) = open_output_stream(self.device_name.as_deref())?;
        Ok(Box::new(RodioSpeaker {
            stream: Some(SendOutput(stream)),
            handle,
            sinks: HashMap::new(),
            origin: Instant::now(),
            finished,
        }))
    }
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), LiveError> {
    if let Some(name) = output_device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| LiveError::Output(format!("failed to enumerate output devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => {
                info!(device = %name, "Using configured output device");
                OutputStream::try_from_device(&dev)
                    .map_err(|e| LiveError::Output(format!("failed to open '{name}': {e}")))
            }
            None => {
                warn!(device = %name, "Configured output device not found, falling back to default");
                OutputStream::try_default()
                    .map_err(|e| LiveError::Output(format!("no audio output device: {e}")))
            }
        }
    } else {
        OutputStream::try_default()
            .map_err(|e| LiveError::Output(format!("no audio output device: {e}")))
    }
}
