//! Audio capture via cpal.
//!
//! Opens the default (or named) input device, captures audio at its native
//! sample rate, resamples to 16 kHz mono f32 if needed, and frames it into
//! fixed-size blocks. Each block is PCM-encoded and queued on the transport's
//! outbound channel straight from the audio callback; the send never waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::codec::{encode_pcm16, encode_transport};
use crate::error::LiveError;
use crate::live::transport::OutboundMessage;

/// Frames microphone samples into blocks and forwards them outbound.
///
/// Blocks completed while the gate is closed (before the transport confirms
/// the session, or after teardown began) are discarded rather than queued.
pub struct CapturePipeline {
    block_size: usize,
    mime_type: String,
    pending: Vec<f32>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    gate: Arc<AtomicBool>,
}

impl CapturePipeline {
    pub fn new(
        block_size: usize,
        sample_rate: u32,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            mime_type: format!("audio/pcm;rate={sample_rate}"),
            pending: Vec::with_capacity(block_size * 2),
            outbound,
            gate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that opens and closes the outbound path.
    pub fn gate(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.gate)
    }

    /// Accept 16 kHz mono samples; returns how many blocks went outbound.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.pending.extend_from_slice(samples);
        let mut forwarded = 0;
        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            if !self.gate.load(Ordering::Acquire) {
                continue;
            }
            let message = OutboundMessage::RealtimeAudio {
                mime_type: self.mime_type.clone(),
                data: encode_transport(&encode_pcm16(&block)),
            };
            // A closed channel means the transport is gone; teardown will
            // close the gate shortly.
            if self.outbound.send(message).is_ok() {
                forwarded += 1;
            }
        }
        forwarded
    }
}

/// A live microphone owned by one session.
pub trait Microphone: Send {
    /// Open the gate: captured blocks start flowing outbound.
    fn start_streaming(&mut self);

    /// Close the gate. Synchronous; no block is sent after this returns.
    fn stop_streaming(&mut self);

    /// Release the underlying capture stream. Idempotent.
    fn release(&mut self);
}

/// Acquires microphones for new sessions.
pub trait MicrophoneProvider: Send + Sync {
    fn acquire(&self, pipeline: CapturePipeline) -> Result<Box<dyn Microphone>, LiveError>;
}

/// Wrapper to make `cpal::Stream` Send.
///
/// The stream is only held to keep the capture callback alive and is
/// dropped from the controller task; it is never used from another thread.
struct SendStream(#[allow(dead_code)] Stream);

// SAFETY: see above. The callback runs on cpal's own thread; dropping the
// stream from any thread is safe.
unsafe impl Send for SendStream {}

/// Microphone backed by a cpal input stream.
pub struct CpalMicrophone {
    stream: Option<SendStream>,
    gate: Arc<AtomicBool>,
}

impl Microphone for CpalMicrophone {
    fn start_streaming(&mut self) {
        self.gate.store(true, Ordering::Release);
        info!("Microphone streaming started");
    }

    fn stop_streaming(&mut self) {
        self.gate.store(false, Ordering::Release);
    }

    fn release(&mut self) {
        self.gate.store(false, Ordering::Release);
        if self.stream.take().is_some() {
            info!("Microphone released");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens cpal input devices for sessions.
pub struct CpalMicrophones {
    device_name: Option<String>,
    target_rate: u32,
}

impl CpalMicrophones {
    pub fn new(device_name: Option<String>, target_rate: u32) -> Self {
        Self {
            device_name,
            target_rate,
        }
    }
}

impl MicrophoneProvider for CpalMicrophones {
    fn acquire(&self, pipeline: CapturePipeline) -> Result<Box<dyn Microphone>, LiveError> {
        let gate = pipeline.gate();
        let stream = start_capture(pipeline, self.device_name.as_deref(), self.target_rate)?;
        Ok(Box::new(CpalMicrophone {
            stream: Some(SendStream(stream)),
            gate,
        }))
    }
}

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig, LiveError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| LiveError::Microphone(format!("failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| LiveError::Microphone(format!("input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| LiveError::Microphone("no default input device available".into()))?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| LiveError::Microphone(format!("failed to get default input config: {e}")))?;

    let native_rate = default_config.sample_rate().0;
    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler from `from_rate` to `to_rate`.
/// Operates on mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Build and start the input stream. The returned stream must be kept alive.
fn start_capture(
    mut pipeline: CapturePipeline,
    device_name: Option<&str>,
    target_rate: u32,
) -> Result<Stream, LiveError> {
    let cfg = resolve_device(device_name)?;
    let native_rate = cfg.native_rate;
    let channels = cfg.stream_config.channels;

    info!(
        native_rate,
        channels,
        target_rate,
        block_size = pipeline.block_size,
        "Input device config"
    );

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let resampled = resample_linear(&mono, native_rate, target_rate);
                pipeline.push(&resampled);
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| LiveError::Microphone(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| LiveError::Microphone(format!("failed to start input stream: {e}")))?;

    debug!("Audio capture started (gate closed)");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{decode_pcm16, decode_transport};

    fn pipeline(block: usize) -> (CapturePipeline, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CapturePipeline::new(block, 16_000, tx), rx)
    }

    #[test]
    fn test_blocks_dropped_while_gate_closed() {
        let (mut p, mut rx) = pipeline(4);
        assert_eq!(p.push(&[0.1; 10]), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_framing_in_capture_order() {
        let (mut p, mut rx) = pipeline(4);
        p.gate().store(true, Ordering::Release);

        assert_eq!(p.push(&[0.5, 0.5, 0.5]), 0);
        assert_eq!(p.push(&[0.5, -0.5, -0.5, -0.5, -0.5, 0.0]), 2);

        let mut firsts = Vec::new();
        while let Ok(OutboundMessage::RealtimeAudio { mime_type, data }) = rx.try_recv() {
            assert_eq!(mime_type, "audio/pcm;rate=16000");
            let frame = decode_pcm16(&decode_transport(&data).unwrap(), 16_000, 1).unwrap();
            assert_eq!(frame.frame_count(), 4);
            firsts.push(frame.channels[0][0]);
        }
        assert_eq!(firsts.len(), 2);
        assert!(firsts[0] > 0.0);
        assert!(firsts[1] < 0.0);
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (mut p, rx) = pipeline(2);
        drop(rx);
        p.gate().store(true, Ordering::Release);
        assert_eq!(p.push(&[0.0; 4]), 0);
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![1.0, 2.0, 3.0];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }

    #[test]
    fn test_resample_downsample() {
        let input: Vec<f32> = (0..48).map(|i| i as f32).collect();
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 16);
    }

    #[test]
    fn test_to_mono_averages() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&[0.25], 1), vec![0.25]);
    }
}
