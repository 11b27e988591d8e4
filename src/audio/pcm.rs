//! PCM16 wire codec.
//!
//! The live session speaks little-endian 16-bit signed PCM in both
//! directions: 16 kHz mono going out to the provider, 24 kHz mono coming
//! back.  [`encode_pcm16`] and [`decode_pcm16`] convert between that wire
//! format and the `f32` sample domain the rest of the audio stack works in.
//!
//! Both functions are pure and synchronous; the only failure mode is a
//! malformed byte length on decode.

use thiserror::Error;

// ---------------------------------------------------------------------------
// PcmError
// ---------------------------------------------------------------------------

/// Errors produced while decoding wire-format PCM.
#[derive(Debug, Error, PartialEq)]
pub enum PcmError {
    /// Byte payload is not a whole number of interleaved i16 frames.
    #[error("PCM payload of {len} bytes is not a multiple of {frame} bytes per frame")]
    MalformedLength { len: usize, frame: usize },

    /// A zero sample rate or channel count makes the buffer meaningless.
    #[error("PCM buffer parameters must be non-zero (rate={rate}, channels={channels})")]
    ZeroParameter { rate: u32, channels: u16 },
}

// ---------------------------------------------------------------------------
// PlaybackBuffer
// ---------------------------------------------------------------------------

/// A decoded, playable block of mono samples at a known rate.
///
/// Produced by [`decode_pcm16`] and consumed by the playback scheduler.
/// Multi-channel wire data is averaged down to mono on decode.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24 000 for provider audio).
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Playback duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// encode / decode
// ---------------------------------------------------------------------------

/// Encode `f32` samples as little-endian 16-bit signed PCM.
///
/// Each sample is clamped to `[-1.0, 1.0]` before scaling so that
/// out-of-range input distorts by saturation instead of wrapping around.
///
/// ```rust
/// use voice_lounge::audio::encode_pcm16;
///
/// let bytes = encode_pcm16(&[0.0, 1.0, -1.0]);
/// assert_eq!(bytes.len(), 6);
/// assert_eq!(&bytes[0..2], &[0, 0]); // 0.0 → 0i16
/// ```
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode little-endian 16-bit signed PCM into a mono [`PlaybackBuffer`].
///
/// Interleaved multi-channel input is downmixed by averaging each frame;
/// mono input passes through unchanged.
///
/// # Errors
///
/// * [`PcmError::MalformedLength`] when `bytes.len()` is not a multiple of
///   `2 * channels`.
/// * [`PcmError::ZeroParameter`] when `sample_rate` or `channels` is zero.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PlaybackBuffer, PcmError> {
    if sample_rate == 0 || channels == 0 {
        return Err(PcmError::ZeroParameter {
            rate: sample_rate,
            channels,
        });
    }

    let frame = 2 * channels as usize;
    if bytes.len() % frame != 0 {
        return Err(PcmError::MalformedLength {
            len: bytes.len(),
            frame,
        });
    }

    let per_frame = channels as usize;
    let samples = bytes
        .chunks_exact(frame)
        .map(|chunk| {
            let sum: f32 = chunk
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / -(i16::MIN as f32))
                .sum();
            sum / per_frame as f32
        })
        .collect();

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
