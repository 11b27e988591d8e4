//! Microphone capture via `cpal`.
//!
//! [`MicSource`] acquires the system default input device and streams
//! [`CaptureFrame`]s (fixed 4096-sample blocks, already normalised to the
//! session's 16 kHz mono capture rate and encoded as wire PCM) over a
//! bounded tokio channel.
//!
//! The cpal stream is not `Send` on every platform, so it lives on a
//! dedicated thread for its whole lifetime; the returned handle only carries
//! a stop signal and is therefore freely movable into the session's event
//! loop task.  Dropping the handle stops the hardware stream.
//!
//! The seam is the [`CaptureSource`] trait so the session controller can be
//! driven by a fake microphone in tests.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::chunker::{downmix_to_mono, resample_linear, CaptureFrame, FrameChunker};

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Fixed parameters of the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate the provider expects for inbound microphone audio (16 000 Hz).
    pub target_rate: u32,
    /// Samples per outbound frame (4096 ≈ 256 ms at 16 kHz).
    pub block_size: usize,
    /// RMS energy above which a block counts as the user speaking.
    pub rms_threshold: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_rate: 16_000,
            block_size: 4096,
            rms_threshold: 0.02,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or starting the microphone.
///
/// All of these are raised before any frame is delivered — the pipeline
/// either starts cleanly or not at all.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture block size must be non-zero")]
    InvalidBlockSize,

    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture thread exited before the stream started")]
    ThreadGone,
}

// ---------------------------------------------------------------------------
// CaptureSource / CaptureHandle
// ---------------------------------------------------------------------------

/// Something that can supply capture frames for a session.
///
/// The real implementation is [`MicSource`]; tests substitute a fake that
/// pushes pre-baked frames or fails like a denied permission prompt.
pub trait CaptureSource: Send + Sync {
    /// Acquire the device and start delivering frames to `tx`.
    ///
    /// Frames are delivered with `try_send`: when the receiver is not
    /// draining (session not open yet, or backpressure) frames are dropped,
    /// never queued.
    fn open(
        &self,
        config: &CaptureConfig,
        tx: mpsc::Sender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// RAII guard for an open capture stream.  Dropping it releases the device.
pub trait CaptureHandle: Send {}

impl std::fmt::Debug for dyn CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CaptureHandle")
    }
}

// ---------------------------------------------------------------------------
// MicSource
// ---------------------------------------------------------------------------

/// Microphone capture built on `cpal`.
pub struct MicSource;

/// Stop signal holder for the capture thread.
struct MicHandle {
    stop_tx: std_mpsc::Sender<()>,
}

impl CaptureHandle for MicHandle {}

impl Drop for MicHandle {
    fn drop(&mut self) {
        // The thread is parked on this channel; an Err here means it is
        // already gone, which is equally fine.
        let _ = self.stop_tx.send(());
    }
}

impl CaptureSource for MicSource {
    fn open(
        &self,
        config: &CaptureConfig,
        tx: mpsc::Sender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        // A zero block size would panic inside the stream callback; reject
        // it here where the config value can be reported cleanly.
        if config.block_size == 0 {
            return Err(CaptureError::InvalidBlockSize);
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let config = config.clone();

        std::thread::spawn(move || {
            // Build everything on this thread; the stream must not migrate.
            let stream = match build_input_stream(&config, tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park until the handle is dropped, keeping the stream alive.
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("capture: microphone stream released");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(MicHandle { stop_tx })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::ThreadGone),
        }
    }
}

/// Build and start the cpal input stream, wiring its callback through
/// downmix → resample → [`FrameChunker`] → `try_send`.
fn build_input_stream(
    config: &CaptureConfig,
    tx: mpsc::Sender<CaptureFrame>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    let supported = device.default_input_config()?;

    let channels = supported.channels();
    let device_rate = supported.sample_rate().0;
    let stream_config: cpal::StreamConfig = supported.into();

    log::info!(
        "capture: opening input device at {device_rate} Hz / {channels} ch, \
         normalising to {} Hz mono",
        config.target_rate
    );

    let target_rate = config.target_rate;
    let mut chunker = FrameChunker::new(config.block_size, config.rms_threshold);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = downmix_to_mono(data, channels);
            let resampled = resample_linear(&mono, device_rate, target_rate);
            for frame in chunker.push(&resampled) {
                // Drop, never queue: the session may not be open yet.
                if tx.try_send(frame).is_err() {
                    log::trace!("capture: frame dropped (channel full or closed)");
                }
            }
        },
        |err: cpal::StreamError| {
            log::error!("capture: cpal stream error: {err}");
        },
        None, // no timeout
    )?;

    stream.play()?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_defaults_match_wire_contract() {
        let config = CaptureConfig::default();
        assert_eq!(config.target_rate, 16_000);
        assert_eq!(config.block_size, 4096);
        assert!((config.rms_threshold - 0.02).abs() < f32::EPSILON);
    }

    /// The handle must be `Send` so the event loop task can own (and drop) it.
    #[test]
    fn capture_handle_is_send() {
        fn assert_send<T: Send + ?Sized>() {}
        assert_send::<Box<dyn CaptureHandle>>();
    }

    #[test]
    fn capture_frame_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureFrame>();
    }

    /// A misconfigured block size is reported as itself, not as a dead
    /// capture thread, and is rejected before any device is touched.
    #[test]
    fn zero_block_size_is_rejected_up_front() {
        let (tx, _rx) = mpsc::channel(1);
        let config = CaptureConfig {
            block_size: 0,
            ..CaptureConfig::default()
        };
        let err = MicSource.open(&config, tx).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidBlockSize));
    }

    /// Dropping a handle whose thread already exited must not panic.
    #[test]
    fn handle_drop_tolerates_dead_thread() {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        drop(stop_rx);
        let handle = MicHandle { stop_tx };
        drop(handle);
    }
}
