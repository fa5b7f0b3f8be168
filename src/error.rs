//! Error types for the live session engine.

use thiserror::Error;

/// An inbound PCM buffer that cannot be played as described.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedAudioError {
    #[error("buffer of {len} bytes is not a whole number of {channels}-channel 16-bit frames")]
    PartialFrame { len: usize, channels: u16 },

    #[error("sample rate must be positive")]
    ZeroSampleRate,
}

/// Everything that can go wrong while a session is being opened or driven.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    MalformedAudio(#[from] MalformedAudioError),

    /// The transport carried audio that is not valid base64.
    #[error("invalid audio encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("no API key configured")]
    MissingApiKey,

    /// Microphone permission denied, device busy or missing.
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    /// The output device could not be opened or refused a unit.
    #[error("audio output unavailable: {0}")]
    Output(String),

    /// Refused, reset, or protocol violation on the agent connection.
    #[error("transport error: {0}")]
    Transport(String),
}

impl LiveError {
    /// Acquisition errors abort `connecting` without touching the transport.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey | Self::Microphone(_) | Self::Output(_)
        )
    }

    /// Malformed inbound data is dropped; the session carries on.
    pub fn is_malformed_inbound(&self) -> bool {
        matches!(self, Self::MalformedAudio(_) | Self::InvalidEncoding(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(LiveError::MissingApiKey.is_acquisition());
        assert!(LiveError::Microphone("denied".into()).is_acquisition());
        assert!(!LiveError::Transport("reset".into()).is_acquisition());

        let malformed = LiveError::from(MalformedAudioError::PartialFrame { len: 3, channels: 1 });
        assert!(malformed.is_malformed_inbound());
        assert!(!malformed.is_acquisition());
    }

    #[test]
    fn test_malformed_message() {
        let err = MalformedAudioError::PartialFrame { len: 6, channels: 2 };
        assert_eq!(
            err.to_string(),
            "buffer of 6 bytes is not a whole number of 2-channel 16-bit frames"
        );
        assert!(LiveError::from(MalformedAudioError::ZeroSampleRate).is_malformed_inbound());
    }
}
