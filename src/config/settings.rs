//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::CaptureConfig;
use crate::session::{LiveSessionConfig, SessionOptions, DEFAULT_AGENT_QUIET_MS};

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Settings for the Gemini API — live audio, chat, and trivia generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key.  May be left empty in the file and supplied via the
    /// `GEMINI_API_KEY` environment variable instead.
    pub api_key: String,
    /// Base URL of the REST endpoints.
    pub base_url: String,
    /// Host of the bidirectional WebSocket endpoint.
    pub ws_host: String,
    /// Model identifier for the live audio session.
    pub live_model: String,
    /// Model identifier for text and trivia generation.
    pub text_model: String,
    /// Prebuilt voice used for agent speech in the voice room.
    pub voice: String,
    /// System prompt for the voice-room host persona.
    pub voice_system_prompt: String,
    /// System prompt for the text chat companion.
    pub chat_system_prompt: String,
    /// Maximum seconds to wait for a REST response before timing out.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        // Live-session defaults come from one place only.
        let live = LiveSessionConfig::default();
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            ws_host: "generativelanguage.googleapis.com".into(),
            live_model: live.model,
            text_model: "gemini-2.5-flash".into(),
            voice: live.voice,
            voice_system_prompt: live.system_prompt,
            chat_system_prompt: "You are Gemnai, a friendly and helpful companion in a \
                                 social lounge. Keep replies short and conversational."
                .into(),
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    /// Effective API key: the config value, or `GEMINI_API_KEY` when the
    /// config value is empty.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var("GEMINI_API_KEY").unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// AudioTuning
// ---------------------------------------------------------------------------

/// Settings for the capture pipeline and the speaking indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTuning {
    /// Sample rate of outbound microphone PCM in Hz (provider expects 16 000).
    pub capture_rate: u32,
    /// Sample rate of inbound agent PCM in Hz (provider emits 24 000).
    pub playback_rate: u32,
    /// Samples per outbound capture block.
    pub block_size: usize,
    /// RMS energy above which a capture block counts as speech.
    pub rms_threshold: f32,
    /// Milliseconds after the last inbound chunk before the agent-speaking
    /// indicator clears.
    pub agent_quiet_ms: u64,
}

impl Default for AudioTuning {
    fn default() -> Self {
        let live = LiveSessionConfig::default();
        let capture = CaptureConfig::default();
        Self {
            capture_rate: live.input_sample_rate,
            playback_rate: live.output_sample_rate,
            block_size: capture.block_size,
            rms_threshold: capture.rms_threshold,
            agent_quiet_ms: DEFAULT_AGENT_QUIET_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_lounge::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gemini API settings.
    pub provider: ProviderConfig,
    /// Capture / playback tuning.
    pub audio: AudioTuning,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Assemble the live-session parameters the controller needs.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            live: LiveSessionConfig {
                model: self.provider.live_model.clone(),
                voice: self.provider.voice.clone(),
                system_prompt: self.provider.voice_system_prompt.clone(),
                input_sample_rate: self.audio.capture_rate,
                output_sample_rate: self.audio.playback_rate,
            },
            capture: CaptureConfig {
                target_rate: self.audio.capture_rate,
                block_size: self.audio.block_size,
                rms_threshold: self.audio.rms_threshold,
            },
            agent_quiet: Duration::from_millis(self.audio.agent_quiet_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Verify that a default `AppConfig` can be serialised to TOML and
    /// deserialised back without any data loss.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.provider.base_url, loaded.provider.base_url);
        assert_eq!(original.provider.live_model, loaded.provider.live_model);
        assert_eq!(original.provider.text_model, loaded.provider.text_model);
        assert_eq!(original.provider.voice, loaded.provider.voice);
        assert_eq!(original.provider.timeout_secs, loaded.provider.timeout_secs);

        assert_eq!(original.audio.capture_rate, loaded.audio.capture_rate);
        assert_eq!(original.audio.playback_rate, loaded.audio.playback_rate);
        assert_eq!(original.audio.block_size, loaded.audio.block_size);
        assert_eq!(original.audio.rms_threshold, loaded.audio.rms_threshold);
        assert_eq!(original.audio.agent_quiet_ms, loaded.audio.agent_quiet_ms);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.provider.live_model, default.provider.live_model);
        assert_eq!(config.audio.block_size, default.audio.block_size);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert!(cfg.provider.api_key.is_empty());
        assert_eq!(
            cfg.provider.base_url,
            "https://generativelanguage.googleapis.com"
        );
        assert_eq!(cfg.provider.voice, "Kore");
        assert_eq!(cfg.audio.capture_rate, 16_000);
        assert_eq!(cfg.audio.playback_rate, 24_000);
        assert_eq!(cfg.audio.block_size, 4096);
        assert_eq!(cfg.audio.rms_threshold, 0.02);
        assert_eq!(cfg.audio.agent_quiet_ms, 500);
    }

    /// Verify that modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.provider.api_key = "test-key".into();
        cfg.provider.voice = "Puck".into();
        cfg.provider.text_model = "gemini-2.0-flash".into();
        cfg.audio.rms_threshold = 0.05;
        cfg.audio.agent_quiet_ms = 750;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.provider.api_key, "test-key");
        assert_eq!(loaded.provider.voice, "Puck");
        assert_eq!(loaded.provider.text_model, "gemini-2.0-flash");
        assert_eq!(loaded.audio.rms_threshold, 0.05);
        assert_eq!(loaded.audio.agent_quiet_ms, 750);
    }

    /// Provider and audio defaults are derived from the live-session
    /// defaults, not restated — the three surfaces can never drift apart.
    #[test]
    fn defaults_share_one_source() {
        let live = LiveSessionConfig::default();
        let cfg = AppConfig::default();

        assert_eq!(cfg.provider.live_model, live.model);
        assert_eq!(cfg.provider.voice, live.voice);
        assert_eq!(cfg.provider.voice_system_prompt, live.system_prompt);
        assert_eq!(cfg.audio.capture_rate, live.input_sample_rate);
        assert_eq!(cfg.audio.playback_rate, live.output_sample_rate);
        assert_eq!(cfg.audio.agent_quiet_ms, DEFAULT_AGENT_QUIET_MS);

        let options = SessionOptions::default();
        assert_eq!(options.live.model, live.model);
        assert_eq!(options.live.voice, live.voice);
    }

    /// The derived session options mirror the config values.
    #[test]
    fn session_options_follow_config() {
        let mut cfg = AppConfig::default();
        cfg.audio.agent_quiet_ms = 200;
        cfg.audio.block_size = 2048;

        let options = cfg.session_options();
        assert_eq!(options.live.model, cfg.provider.live_model);
        assert_eq!(options.live.output_sample_rate, 24_000);
        assert_eq!(options.capture.block_size, 2048);
        assert_eq!(options.agent_quiet, Duration::from_millis(200));
    }
}
