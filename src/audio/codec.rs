//! PCM codec: f32 samples <-> 16-bit little-endian PCM, and binary <-> base64.
//!
//! Outbound microphone blocks are encoded with [`encode_pcm16`] and wrapped
//! with [`encode_transport`]; inbound speech goes the other way through
//! [`decode_transport`] and [`decode_pcm16`].

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::error::MalformedAudioError;

/// One decoded block of speech, deinterleaved per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    pub sample_rate: u32,
    /// One sample array per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl PcmFrame {
    /// Number of samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Re-interleave for output devices that expect packed frames.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

/// Encode f32 samples as signed 16-bit little-endian PCM.
///
/// Samples are clamped to [-1, 1]; negative values scale by 32768 and the
/// rest by 32767. Non-finite samples encode as silence.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = if sample.is_finite() {
            sample.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let value = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode interleaved signed 16-bit little-endian PCM into per-channel floats.
///
/// A zero sample rate is rejected along with partial frames; neither can be
/// played.
pub fn decode_pcm16(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PcmFrame, MalformedAudioError> {
    if sample_rate == 0 {
        return Err(MalformedAudioError::ZeroSampleRate);
    }
    let frame_bytes = 2 * channels as usize;
    if channels == 0 || bytes.len() % frame_bytes != 0 {
        return Err(MalformedAudioError::PartialFrame {
            len: bytes.len(),
            channels,
        });
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut planes = vec![Vec::with_capacity(frame_count); channels as usize];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(2)) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            plane.push(value as f32 / 32768.0);
        }
    }

    Ok(PcmFrame {
        sample_rate,
        channels: planes,
    })
}

/// Binary -> transport-safe text.
pub fn encode_transport(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Transport-safe text -> binary.
pub fn decode_transport(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    B64.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scaling_and_clamp() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0, 2.0, -3.0, 0.5]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![0, 32767, -32768, 32767, -32768, 16383]);
    }

    #[test]
    fn test_encode_non_finite_is_silence() {
        let bytes = encode_pcm16(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY]);
        assert_eq!(bytes, vec![0u8; 6]);
    }

    #[test]
    fn test_roundtrip_within_quantization() {
        let input: Vec<f32> = (0..1000)
            .map(|i| ((i as f32) * 0.37).sin() * 0.99)
            .collect();
        let frame = decode_pcm16(&encode_pcm16(&input), 16_000, 1).unwrap();
        assert_eq!(frame.frame_count(), input.len());
        // Positive samples scale by 32767 on the way out and 1/32768 on the
        // way back, so the bound is one step plus the scale mismatch.
        for (a, b) in input.iter().zip(&frame.channels[0]) {
            assert!((a - b).abs() <= 2.0 / 32768.0, "{a} vs {b}");
            if *a < 0.0 {
                assert!((a - b).abs() <= 1.0 / 32768.0 + f32::EPSILON, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_decode_deinterleaves_stereo() {
        let mut bytes = Vec::new();
        for v in [100i16, -100, 200, -200] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let frame = decode_pcm16(&bytes, 24_000, 2).unwrap();
        assert_eq!(frame.channels.len(), 2);
        assert_eq!(frame.channels[0], vec![100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(frame.channels[1], vec![-100.0 / 32768.0, -200.0 / 32768.0]);
        assert_eq!(frame.interleaved().len(), 4);
    }

    #[test]
    fn test_decode_rejects_partial_frame() {
        let err = decode_pcm16(&[0, 1, 2], 24_000, 1).unwrap_err();
        assert_eq!(err, MalformedAudioError::PartialFrame { len: 3, channels: 1 });
        // Even byte count, but not a whole number of stereo frames.
        assert!(decode_pcm16(&[0, 0, 0, 0, 0, 0], 24_000, 2).is_err());
        assert!(decode_pcm16(&[0, 0], 24_000, 0).is_err());
    }

    #[test]
    fn test_decode_rejects_zero_rate() {
        let err = decode_pcm16(&[0, 0, 0, 0], 0, 1).unwrap_err();
        assert_eq!(err, MalformedAudioError::ZeroSampleRate);
    }

    #[test]
    fn test_duration() {
        let frame = decode_pcm16(&vec![0u8; 4800], 24_000, 1).unwrap();
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_transport_roundtrip_exact() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = encode_transport(&bytes);
        assert!(text.is_ascii());
        assert_eq!(decode_transport(&text).unwrap(), bytes);
        assert!(decode_transport("not base64!").is_err());
    }
}
