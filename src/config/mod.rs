//! Configuration module for Voice Lounge.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the provider
//! and the audio pipeline, `AppPaths` for cross-platform data directories,
//! and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioTuning, ProviderConfig};
