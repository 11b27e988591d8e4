//! Fixed-block framing of capture audio.
//!
//! The live session sends microphone audio as fixed 4096-sample blocks at
//! 16 kHz (≈256 ms per block).  [`FrameChunker`] accumulates incoming mono
//! samples, and for every full block emits a [`CaptureFrame`] carrying:
//!
//! * the block encoded as wire PCM ([`crate::audio::encode_pcm16`]), and
//! * a speaking/silence boolean — the block's RMS energy compared against a
//!   fixed threshold, recomputed per block with no hysteresis.
//!
//! The module also carries the two normalisation helpers the capture thread
//! applies before chunking: [`downmix_to_mono`] and [`resample_linear`].

use crate::audio::pcm::encode_pcm16;

// ---------------------------------------------------------------------------
// CaptureFrame
// ---------------------------------------------------------------------------

/// One outbound audio frame, ready for the session's outbound channel.
///
/// Ephemeral: produced on a fixed cadence and consumed immediately — the
/// delivery channel is small and frames are dropped, never queued, when the
/// session is not draining them.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// The block encoded as little-endian 16-bit PCM.
    pub pcm: Vec<u8>,
    /// Whether the block's RMS energy exceeded the speaking threshold.
    pub speaking: bool,
}

// ---------------------------------------------------------------------------
// FrameChunker
// ---------------------------------------------------------------------------

/// Accumulates mono samples into fixed-size blocks.
///
/// # Example
///
/// ```rust
/// use voice_lounge::audio::FrameChunker;
///
/// let mut chunker = FrameChunker::new(4096, 0.02);
/// // 4095 samples: not enough for a block yet.
/// assert!(chunker.push(&vec![0.0_f32; 4095]).is_empty());
/// // One more sample completes the block.
/// let frames = chunker.push(&[0.0]);
/// assert_eq!(frames.len(), 1);
/// assert!(!frames[0].speaking);
/// ```
pub struct FrameChunker {
    block_size: usize,
    rms_threshold: f32,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker emitting `block_size`-sample frames, classifying a
    /// block as speech when its RMS energy exceeds `rms_threshold`.
    pub fn new(block_size: usize, rms_threshold: f32) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self {
            block_size,
            rms_threshold,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Feed mono samples; returns one [`CaptureFrame`] per completed block.
    ///
    /// Partial blocks stay buffered until the next call — at most
    /// `block_size - 1` samples are ever held back.
    pub fn push(&mut self, samples: &[f32]) -> Vec<CaptureFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            let speaking = rms(&block) > self.rms_threshold;
            frames.push(CaptureFrame {
                pcm: encode_pcm16(&block),
                speaking,
            });
        }
        frames
    }

    /// Number of samples buffered waiting for a full block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Root-mean-square energy of a block of samples.
fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32;
    mean_sq.sqrt()
}

// ---------------------------------------------------------------------------
// Capture normalisation helpers
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging each frame.
///
/// The output length is `samples.len() / channels`.  Mono input is returned
/// as an owned copy; zero channels yields an empty vector.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample mono samples from `source_rate` to `target_rate` Hz using linear
/// interpolation.
///
/// Matching rates are a no-op copy.  The interpolation is deliberately
/// simple; microphone speech headed for the provider does not need a
/// windowed-sinc resampler.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_block_emits_nothing() {
        let mut chunker = FrameChunker::new(4096, 0.02);
        assert!(chunker.push(&vec![0.1_f32; 4095]).is_empty());
        assert_eq!(chunker.pending_len(), 4095);
    }

    #[test]
    fn full_block_emits_one_frame() {
        let mut chunker = FrameChunker::new(4096, 0.02);
        let frames = chunker.push(&vec![0.1_f32; 4096]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pcm.len(), 4096 * 2);
        assert_eq!(chunker.pending_len(), 0);
    }

    #[test]
    fn oversized_push_emits_multiple_frames() {
        let mut chunker = FrameChunker::new(4096, 0.02);
        let frames = chunker.push(&vec![0.1_f32; 4096 * 2 + 100]);
        assert_eq!(frames.len(), 2);
        assert_eq!(chunker.pending_len(), 100);
    }

    #[test]
    fn speaking_tracks_rms_threshold_exactly() {
        let mut chunker = FrameChunker::new(4096, 0.02);

        // Constant 0.5 amplitude → RMS 0.5, well above 0.02.
        let loud = chunker.push(&vec![0.5_f32; 4096]);
        assert!(loud[0].speaking);

        // Constant 0.01 amplitude → RMS 0.01, below threshold.
        let quiet = chunker.push(&vec![0.01_f32; 4096]);
        assert!(!quiet[0].speaking);
    }

    #[test]
    fn no_hysteresis_between_blocks() {
        // Alternating loud / quiet blocks must alternate the flag.
        let mut chunker = FrameChunker::new(4096, 0.02);
        let mut input = vec![0.5_f32; 4096];
        input.extend(vec![0.0_f32; 4096]);
        input.extend(vec![0.5_f32; 4096]);

        let frames = chunker.push(&input);
        let flags: Vec<bool> = frames.iter().map(|f| f.speaking).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!((rms(&[0.0; 128]) - 0.0).abs() < f32::EPSILON);
        assert!((rms(&[]) - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    #[should_panic(expected = "block_size must be > 0")]
    fn zero_block_size_panics() {
        FrameChunker::new(0, 0.02);
    }

    // ---- downmix_to_mono ---------------------------------------------------

    #[test]
    fn downmix_stereo_averages_frames() {
        let stereo = vec![1.0_f32, -1.0, 0.5, 0.5];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.0).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_mono_is_copy() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix_to_mono(&[1.0, 2.0], 0).is_empty());
    }

    // ---- resample_linear ---------------------------------------------------

    #[test]
    fn resample_same_rate_is_noop() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        let out = resample_linear(&input, 16_000, 16_000);
        assert_eq!(out, input);
    }

    #[test]
    fn resample_48k_to_16k_length() {
        // 480 samples @ 48 kHz = 10 ms → 160 samples @ 16 kHz.
        let out = resample_linear(&vec![0.5_f32; 480], 48_000, 16_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn resample_preserves_dc_amplitude() {
        let out = resample_linear(&vec![0.5_f32; 480], 48_000, 16_000);
        for &s in &out {
            assert!((s - 0.5).abs() < 1e-5, "amplitude drift: {s}");
        }
    }

    #[test]
    fn resample_empty_is_empty() {
        assert!(resample_linear(&[], 48_000, 16_000).is_empty());
    }
}
