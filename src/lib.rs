//! Voice Lounge — a real-time voice conversation room backed by the Gemini
//! Live API, plus the text-chat and trivia clients that share its provider.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  CaptureFrame   ┌───────────────────┐  realtimeInput  ┌──────────┐
//! │ audio::  │ ───────────────▶│ session::         │ ───────────────▶│ provider │
//! │ capture  │  (drop-on-full) │ SessionController │                 │ ::live   │
//! └──────────┘                 │   (event loop)    │◀─────────────── └──────────┘
//! ┌──────────┐  PlaybackBuffer │                   │  SessionEvent
//! │ audio::  │◀─────────────── └───────────────────┘
//! │ playback │   (scheduled)
//! └──────────┘
//! ```
//!
//! The controller owns the session lifecycle (`Idle → Connecting →
//! Connected → Idle`), forwards microphone frames outbound, schedules
//! inbound agent audio gaplessly, and maintains the turn signals the UI
//! renders.  Every hardware and network dependency sits behind a trait
//! (`CaptureSource`, `PlaybackOutput`, `LiveAudioTransport`) so the whole
//! lifecycle is testable without devices or sockets.

pub mod audio;
pub mod config;
pub mod provider;
pub mod session;
