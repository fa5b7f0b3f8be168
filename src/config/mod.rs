//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use paths::get_data_dir;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_VOICE: &str = "Kore";
pub const DEFAULT_INSTRUCTION: &str = "You are the voice assistant of a particle visualizer. \
    Answer briefly and use the available tools to change what is on screen.";

/// live_config.json shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_block_size: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub location_enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub lookup_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            voice_name: DEFAULT_VOICE.into(),
            system_instruction: DEFAULT_INSTRUCTION.into(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            capture_block_size: 4096,
            input_device: None,
            output_device: None,
            location_enabled: true,
            latitude: None,
            longitude: None,
            lookup_timeout_secs: 15,
        }
    }
}

impl LiveConfig {
    /// Non-empty API key, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Fixed coordinates, only when both halves are present.
    pub fn fixed_location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs.max(1))
    }

    /// Replace the file's key with `GEMINI_API_KEY` or `API_KEY` when set.
    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let from_env = ["GEMINI_API_KEY", "API_KEY"]
            .into_iter()
            .filter_map(|name| lookup(name))
            .find(|v| !v.trim().is_empty());
        if from_env.is_some() {
            self.api_key = from_env;
        }
        self
    }
}

/// Read live_config.json from the data directory, with environment overrides.
pub fn read_live_config() -> LiveConfig {
    let path = get_config_path();
    read_json_file::<LiveConfig>(&path)
        .unwrap_or_default()
        .apply_env(|name| std::env::var(name).ok())
}

/// Path to live_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("live_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
