//! Gapless scheduling of provider audio.
//!
//! The provider streams encoded audio in arbitrary-sized chunks.
//! [`PlaybackScheduler`] owns the monotonic playback cursor and schedules
//! each decoded [`PlaybackBuffer`] back-to-back:
//!
//! ```text
//! start        = max(next_start, clock.now())
//! next_start   = start + buffer duration
//! ```
//!
//! Timely chunks therefore play with no audible gap; a late chunk is clamped
//! to "now" instead of overlapping what is already playing.  An interruption
//! (user barged in) stops every queued buffer and resets the cursor, so
//! queued-but-unplayed agent speech is dropped immediately.
//!
//! The scheduler talks to the host audio system through the [`OutputClock`]
//! and [`AudioSink`] seams; [`CpalOutput`] provides the real pair, backed by
//! a cpal output stream on a dedicated thread with a sample-indexed playout
//! queue mixed in the output callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::chunker::resample_linear;
use crate::audio::pcm::PlaybackBuffer;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Monotonic clock of the output device, in seconds since the stream opened.
pub trait OutputClock: Send {
    fn now(&self) -> f64;
}

/// Destination for scheduled buffers.
pub trait AudioSink: Send {
    /// Begin playing `buffer` at `start_at` seconds on the output clock.
    fn play_at(&mut self, buffer: PlaybackBuffer, start_at: f64);

    /// Stop and discard every scheduled buffer, played or not.
    fn stop_all(&mut self);
}

/// Factory opening a (sink, clock) pair for one session.
///
/// A fresh pair is created on every `start()` and dropped as a unit on
/// teardown, mirroring the session-lifetime ownership of the audio contexts.
pub trait PlaybackOutput: Send + Sync {
    fn open(&self, sample_rate: u32) -> Result<(Box<dyn AudioSink>, Box<dyn OutputClock>), PlaybackError>;
}

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the audio output.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("playback thread exited before the stream started")]
    ThreadGone,
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Owns the monotonic cursor and schedules decoded chunks gaplessly.
///
/// Single-writer: only the session event loop calls into it.
pub struct PlaybackScheduler {
    clock: Box<dyn OutputClock>,
    sink: Box<dyn AudioSink>,
    next_start: f64,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>, clock: Box<dyn OutputClock>) -> Self {
        Self {
            clock,
            sink,
            next_start: 0.0,
        }
    }

    /// Schedule `buffer` for gapless playback; returns its start time.
    ///
    /// The cursor never moves backwards here — only [`interrupt`]
    /// (Self::interrupt) may reset it.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> f64 {
        let start = self.next_start.max(self.clock.now());
        let duration = buffer.duration_secs();
        self.sink.play_at(buffer, start);
        self.next_start = start + duration;
        start
    }

    /// Drop all queued speech and reset the cursor.
    ///
    /// The next chunk will be scheduled relative to the current clock, not
    /// the stale cursor.
    pub fn interrupt(&mut self) {
        self.sink.stop_all();
        self.next_start = 0.0;
    }

    /// Current cursor position in seconds.
    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}

// ---------------------------------------------------------------------------
// CpalOutput — real sink + clock
// ---------------------------------------------------------------------------

/// A buffer positioned on the output sample timeline.
struct Scheduled {
    start_sample: u64,
    samples: Vec<f32>,
}

/// State shared between the output callback and the sink/clock handles.
struct PlayoutShared {
    /// Output samples rendered so far (per channel frame count).
    cursor: AtomicU64,
    queue: Mutex<Vec<Scheduled>>,
}

/// Opens the default cpal output device.
///
/// The output stream runs at the device's native rate; scheduled buffers are
/// linearly resampled from the provider's playback rate on enqueue.  Like
/// the capture stream, the cpal stream object lives on its own thread and is
/// released when the sink is dropped.
pub struct CpalOutput;

impl PlaybackOutput for CpalOutput {
    fn open(&self, sample_rate: u32) -> Result<(Box<dyn AudioSink>, Box<dyn OutputClock>), PlaybackError> {
        let shared = Arc::new(PlayoutShared {
            cursor: AtomicU64::new(0),
            queue: Mutex::new(Vec::new()),
        });

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, PlaybackError>>();
        let thread_shared = Arc::clone(&shared);

        std::thread::spawn(move || {
            let stream = match build_output_stream(Arc::clone(&thread_shared)) {
                Ok((stream, device_rate)) => {
                    let _ = ready_tx.send(Ok(device_rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("playback: output stream released");
        });

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PlaybackError::ThreadGone),
        };

        log::info!(
            "playback: output open at {device_rate} Hz (provider audio at {sample_rate} Hz)"
        );

        let sink = CpalSink {
            shared: Arc::clone(&shared),
            device_rate,
            _stop_tx: stop_tx,
        };
        let clock = PlayoutClock {
            shared,
            device_rate,
        };
        Ok((Box::new(sink), Box::new(clock)))
    }
}

/// Sink handle writing into the shared playout queue.
struct CpalSink {
    shared: Arc<PlayoutShared>,
    device_rate: u32,
    /// Dropping this stops the output thread (and the hardware stream).
    _stop_tx: std_mpsc::Sender<()>,
}

impl AudioSink for CpalSink {
    fn play_at(&mut self, buffer: PlaybackBuffer, start_at: f64) {
        let samples = resample_linear(&buffer.samples, buffer.sample_rate, self.device_rate);
        let start_sample = (start_at * self.device_rate as f64) as u64;
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.push(Scheduled {
                start_sample,
                samples,
            });
        }
    }

    fn stop_all(&mut self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.clear();
        }
    }
}

/// Clock handle derived from the rendered-sample counter.
struct PlayoutClock {
    shared: Arc<PlayoutShared>,
    device_rate: u32,
}

impl OutputClock for PlayoutClock {
    fn now(&self) -> f64 {
        self.shared.cursor.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }
}

/// Build the output stream whose callback mixes the playout queue.
fn build_output_stream(shared: Arc<PlayoutShared>) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(PlaybackError::NoDevice)?;
    let supported = device.default_output_config()?;

    let channels = supported.channels() as usize;
    let device_rate = supported.sample_rate().0;
    let stream_config: cpal::StreamConfig = supported.into();

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = (data.len() / channels) as u64;
            let base = shared.cursor.load(Ordering::Acquire);

            let mut queue = match shared.queue.lock() {
                Ok(q) => q,
                Err(_) => return,
            };

            for (i, frame) in data.chunks_exact_mut(channels).enumerate() {
                let t = base + i as u64;
                let mut acc = 0.0_f32;
                for entry in queue.iter() {
                    if t >= entry.start_sample {
                        let offset = (t - entry.start_sample) as usize;
                        if offset < entry.samples.len() {
                            acc += entry.samples[offset];
                        }
                    }
                }
                // Mono content duplicated across device channels.
                for slot in frame.iter_mut() {
                    *slot = acc;
                }
            }

            let end = base + frames;
            queue.retain(|entry| entry.start_sample + entry.samples.len() as u64 > end);
            drop(queue);

            shared.cursor.store(end, Ordering::Release);
        },
        |err: cpal::StreamError| {
            log::error!("playback: cpal stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, device_rate))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Manually advanced clock shared with the test body.
    #[derive(Clone)]
    struct FakeClock(Arc<Mutex<f64>>);

    impl FakeClock {
        fn new() -> Self {
            FakeClock(Arc::new(Mutex::new(0.0)))
        }
        fn set(&self, t: f64) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl OutputClock for FakeClock {
        fn now(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    /// Records every scheduled (start, duration) pair and stop_all calls.
    #[derive(Clone)]
    struct RecordingSink {
        plays: Arc<Mutex<Vec<(f64, f64)>>>,
        stops: Arc<AtomicU32>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                plays: Arc::new(Mutex::new(Vec::new())),
                stops: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    impl AudioSink for RecordingSink {
        fn play_at(&mut self, buffer: PlaybackBuffer, start_at: f64) {
            self.plays
                .lock()
                .unwrap()
                .push((start_at, buffer.duration_secs()));
        }
        fn stop_all(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn chunk_ms(ms: u64) -> PlaybackBuffer {
        PlaybackBuffer {
            samples: vec![0.0; (24_000 * ms / 1000) as usize],
            sample_rate: 24_000,
        }
    }

    fn scheduler(clock: FakeClock, sink: RecordingSink) -> PlaybackScheduler {
        PlaybackScheduler::new(Box::new(sink), Box::new(clock))
    }

    #[test]
    fn timely_chunks_play_back_to_back() {
        let clock = FakeClock::new();
        let sink = RecordingSink::new();
        let mut sched = scheduler(clock.clone(), sink.clone());

        // 40 chunks of 200 ms arriving with zero network delay.
        for _ in 0..40 {
            sched.enqueue(chunk_ms(200));
        }

        let plays = sink.plays.lock().unwrap();
        assert_eq!(plays.len(), 40);
        for pair in plays.windows(2) {
            let (start_a, dur_a) = pair[0];
            let (start_b, _) = pair[1];
            let gap = start_b - (start_a + dur_a);
            assert!(gap.abs() < 0.001, "gap of {gap}s between chunks");
        }
        // Total span ≈ 8000 ms.
        let (last_start, last_dur) = *plays.last().unwrap();
        assert!((last_start + last_dur - 8.0).abs() < 0.001);
    }

    #[test]
    fn start_times_are_non_decreasing_and_non_overlapping() {
        let clock = FakeClock::new();
        let sink = RecordingSink::new();
        let mut sched = scheduler(clock.clone(), sink.clone());

        let durations = [120_u64, 80, 200, 40, 160];
        for (i, &ms) in durations.iter().enumerate() {
            // Arrival times trail the schedule slightly.
            clock.set(i as f64 * 0.01);
            sched.enqueue(chunk_ms(ms));
        }

        let plays = sink.plays.lock().unwrap();
        for pair in plays.windows(2) {
            let (start_a, dur_a) = pair[0];
            let (start_b, _) = pair[1];
            assert!(start_b >= start_a, "starts went backwards");
            assert!(
                start_b >= start_a + dur_a - 1e-9,
                "chunk overlaps its predecessor"
            );
        }
    }

    #[test]
    fn late_chunk_is_clamped_to_now() {
        let clock = FakeClock::new();
        let sink = RecordingSink::new();
        let mut sched = scheduler(clock.clone(), sink.clone());

        sched.enqueue(chunk_ms(100)); // plays at 0.0, cursor → 0.1

        // Next chunk arrives well after the previous one finished.
        clock.set(0.5);
        let start = sched.enqueue(chunk_ms(100));
        assert!((start - 0.5).abs() < 1e-9);
        assert!((sched.next_start() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn interrupt_stops_queued_audio_and_resets_cursor() {
        let clock = FakeClock::new();
        let sink = RecordingSink::new();
        let mut sched = scheduler(clock.clone(), sink.clone());

        sched.enqueue(chunk_ms(200));
        sched.enqueue(chunk_ms(200));
        assert!((sched.next_start() - 0.4).abs() < 1e-9);

        sched.interrupt();
        assert_eq!(sink.stops.load(Ordering::SeqCst), 1);
        assert!((sched.next_start() - 0.0).abs() < f64::EPSILON);

        // The next chunk schedules relative to the clock, not the stale cursor.
        clock.set(0.25);
        let start = sched.enqueue(chunk_ms(100));
        assert!((start - 0.25).abs() < 1e-9);
    }

    #[test]
    fn cursor_advances_by_exact_durations() {
        let clock = FakeClock::new();
        let sink = RecordingSink::new();
        let mut sched = scheduler(clock, sink);

        sched.enqueue(chunk_ms(200));
        sched.enqueue(chunk_ms(50));
        sched.enqueue(chunk_ms(150));
        assert!((sched.next_start() - 0.4).abs() < 1e-9);
    }

    // ---- playout queue mixing (the callback's core loop, exercised directly)

    #[test]
    fn playout_queue_clears_on_stop_all() {
        let shared = Arc::new(PlayoutShared {
            cursor: AtomicU64::new(0),
            queue: Mutex::new(Vec::new()),
        });
        let mut sink = CpalSink {
            shared: Arc::clone(&shared),
            device_rate: 24_000,
            _stop_tx: std_mpsc::channel().0,
        };

        sink.play_at(chunk_ms(200), 0.0);
        sink.play_at(chunk_ms(200), 0.2);
        assert_eq!(shared.queue.lock().unwrap().len(), 2);

        sink.stop_all();
        assert!(shared.queue.lock().unwrap().is_empty());
    }

    #[test]
    fn sink_resamples_to_device_rate() {
        let shared = Arc::new(PlayoutShared {
            cursor: AtomicU64::new(0),
            queue: Mutex::new(Vec::new()),
        });
        let mut sink = CpalSink {
            shared: Arc::clone(&shared),
            device_rate: 48_000,
            _stop_tx: std_mpsc::channel().0,
        };

        // 200 ms at 24 kHz → 200 ms at 48 kHz = 9600 samples.
        sink.play_at(chunk_ms(200), 0.0);
        let queue = shared.queue.lock().unwrap();
        assert_eq!(queue[0].samples.len(), 9_600);
    }

    #[test]
    fn playout_clock_tracks_cursor() {
        let shared = Arc::new(PlayoutShared {
            cursor: AtomicU64::new(12_000),
            queue: Mutex::new(Vec::new()),
        });
        let clock = PlayoutClock {
            shared,
            device_rate: 24_000,
        };
        assert!((clock.now() - 0.5).abs() < 1e-9);
    }
}
