//! Audio plumbing — PCM codec, capture pipeline, decode/schedule buffer.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix/resample → FrameChunker
//!            → CaptureFrame (mpsc, drop-on-full) → live session outbound
//!
//! Provider chunk → decode_pcm16 → PlaybackBuffer → PlaybackScheduler
//!                → AudioSink (cpal output callback, sample-indexed queue)
//! ```
//!
//! Both cpal streams are owned by dedicated threads; the handles that reach
//! the session layer are `Send` and release the hardware on drop.

pub mod capture;
pub mod chunker;
pub mod pcm;
pub mod playback;

pub use capture::{CaptureConfig, CaptureError, CaptureHandle, CaptureSource, MicSource};
pub use chunker::{downmix_to_mono, resample_linear, CaptureFrame, FrameChunker};
pub use pcm::{decode_pcm16, encode_pcm16, PcmError, PlaybackBuffer};
pub use playback::{
    AudioSink, CpalOutput, OutputClock, PlaybackError, PlaybackOutput, PlaybackScheduler,
};
