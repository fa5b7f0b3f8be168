//! Audio capture, PCM codec, and scheduled playback.

pub mod capture;
pub mod codec;
pub mod playback;
pub mod scheduler;

pub use capture::{CapturePipeline, CpalMicrophones, Microphone, MicrophoneProvider};
pub use playback::{RodioSpeakers, Speaker, SpeakerProvider, UnitId};
pub use scheduler::{Completion, PlaybackScheduler};
