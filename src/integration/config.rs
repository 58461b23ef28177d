//! Session configuration
//!
//! Loaded from TOML, overridden from the environment, and adjustable through
//! builder-style `with_*` methods.

use crate::{Result, TutorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_EVALUATION_MODEL: &str = "gpt-4o-mini";

/// Audio device and framing settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
    /// Capture channel depth in seconds of audio
    pub capture_buffer_secs: f32,
    /// Playback channel depth in seconds of audio
    pub playback_buffer_secs: f32,
    pub device_startup_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            frame_ms: 100,
            input_device: None,
            output_device: None,
            capture_buffer_secs: 20.0,
            playback_buffer_secs: 30.0,
            device_startup_timeout_ms: 3_000,
        }
    }
}

impl AudioConfig {
    /// Samples per frame
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_ms as u64 / 1000) as usize
    }

    pub fn capture_capacity(&self) -> usize {
        self.frames_for(self.capture_buffer_secs)
    }

    pub fn playback_capacity(&self) -> usize {
        self.frames_for(self.playback_buffer_secs)
    }

    fn frames_for(&self, secs: f32) -> usize {
        if self.frame_ms == 0 {
            return 1;
        }
        ((secs * 1000.0) / self.frame_ms as f32).ceil().max(1.0) as usize
    }
}

/// Remote speech model connection settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub voice: String,
    pub temperature: f64,
    pub transcription_model: String,
    pub vad_threshold: f64,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    pub connect_timeout_ms: u64,
    pub reconnect_attempt_timeout_ms: u64,
    pub max_reconnect_attempts: usize,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Outgoing message queue depth; a full queue reports saturation
    pub send_queue: usize,
    pub resume_after_tool_call: bool,
    /// Utterances replayed as context after a reconnect
    pub context_utterances: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            api_key: None,
            voice: "alloy".to_string(),
            temperature: 0.8,
            transcription_model: "whisper-1".to_string(),
            vad_threshold: 0.3,
            vad_prefix_padding_ms: 500,
            vad_silence_duration_ms: 1000,
            connect_timeout_ms: 10_000,
            reconnect_attempt_timeout_ms: 10_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 16_000,
            send_queue: 64,
            resume_after_tool_call: true,
            context_utterances: 6,
        }
    }
}

impl RealtimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_attempt_timeout_ms)
    }
}

/// Scoring cadence and the evaluation model
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub api_base: String,
    pub evaluation_model: String,
    pub tick_interval_ms: u64,
    pub model_every_utterances: usize,
    pub model_every_secs: u64,
    pub model_min_utterances: usize,
    pub request_timeout_ms: u64,
    pub generate_feedback: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            evaluation_model: DEFAULT_EVALUATION_MODEL.to_string(),
            tick_interval_ms: 3_000,
            model_every_utterances: 10,
            model_every_secs: 120,
            model_min_utterances: 3,
            request_timeout_ms: 30_000,
            generate_feedback: true,
        }
    }
}

impl ScoringConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn model_interval(&self) -> Duration {
        Duration::from_secs(self.model_every_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Configuration for one conversation session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub realtime: RealtimeConfig,
    pub scoring: ScoringConfig,
    pub storage: StorageConfig,
    /// Extra text appended to the tutor instructions (topic, learner notes)
    pub context: String,
    /// Budget for the loops to wind down before they are aborted
    pub stop_timeout_ms: u64,
    /// Budget for playback to finish queued audio on a graceful stop
    pub drain_timeout_ms: u64,
    pub ui_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            realtime: RealtimeConfig::default(),
            scoring: ScoringConfig::default(),
            storage: StorageConfig::default(),
            context: String::new(),
            stop_timeout_ms: 3_000,
            drain_timeout_ms: 1_000,
            ui_channel_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TutorError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TutorError::ConfigError(format!("Invalid configuration: {}", e)))
    }

    /// Apply `OPENAI_API_KEY`, `PARLANCE_REALTIME_MODEL` and `PARLANCE_DATA_DIR`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.realtime.api_key = Some(key);
        }
        if let Some(model) = lookup("PARLANCE_REALTIME_MODEL").filter(|m| !m.is_empty()) {
            self.realtime.model = model;
        }
        if let Some(dir) = lookup("PARLANCE_DATA_DIR").filter(|d| !d.is_empty()) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.realtime.api_key = Some(key.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_devices(mut self, input: Option<usize>, output: Option<usize>) -> Self {
        self.audio.input_device = input;
        self.audio.output_device = output;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.scoring.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = dir.into();
        self.storage.enabled = true;
        self
    }

    pub fn without_storage(mut self) -> Self {
        self.storage.enabled = false;
        self
    }

    pub fn without_feedback(mut self) -> Self {
        self.scoring.generate_feedback = false;
        self
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// The API key, required whenever a networked connector or evaluator is used.
    pub fn api_key(&self) -> Result<&str> {
        self.realtime
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TutorError::ConfigError("OPENAI_API_KEY is not set".into()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(TutorError::ConfigError("audio.sample_rate must be positive".into()));
        }
        if self.audio.frame_ms == 0 || self.audio.frame_samples() == 0 {
            return Err(TutorError::ConfigError("audio.frame_ms must be positive".into()));
        }
        if self.audio.capture_buffer_secs <= 0.0 || self.audio.playback_buffer_secs <= 0.0 {
            return Err(TutorError::ConfigError("audio buffer sizes must be positive".into()));
        }
        if self.realtime.max_reconnect_attempts == 0 {
            return Err(TutorError::ConfigError(
                "realtime.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.realtime.send_queue == 0 {
            return Err(TutorError::ConfigError("realtime.send_queue must be positive".into()));
        }
        if self.scoring.tick_interval_ms == 0 {
            return Err(TutorError::ConfigError(
                "scoring.tick_interval_ms must be positive".into(),
            ));
        }
        if self.scoring.model_every_utterances == 0 {
            return Err(TutorError::ConfigError(
                "scoring.model_every_utterances must be positive".into(),
            ));
        }
        if self.ui_channel_capacity == 0 {
            return Err(TutorError::ConfigError("ui_channel_capacity must be positive".into()));
        }
        Ok(())
    }
}
