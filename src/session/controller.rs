//! Live session controller — owns the connect/teardown lifecycle.
//!
//! [`SessionController`] drives the voice room:
//!
//! ```text
//! start()
//!   ├─▶ open audio output (decode/schedule buffer)
//!   ├─▶ acquire microphone (suspends on the permission prompt)
//!   ├─▶ transport handshake (suspends on the network)
//!   └─▶ spawn event loop, state = Connected
//!
//! event loop (single event-processing point, tokio::select!)
//!   ├─ capture frame   → user_speaking, forward PCM outbound
//!   ├─ audio chunk     → agent_speaking + quiescence timer, schedule playback
//!   ├─ interrupted     → drop queued agent speech, reset cursor
//!   ├─ closed / error  → teardown back to Idle (error message on the error path)
//!   └─ quiescence timer → agent_speaking = false
//! ```
//!
//! `stop()` is the only cancellation primitive: it is synchronous,
//! idempotent, valid in any state, and honoured even against a `start()`
//! that is still suspended — an epoch counter claimed by `start` and bumped
//! by `stop` makes the resolved `start` abandon its partial resources
//! instead of re-populating a session that was already torn down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{
    decode_pcm16, CaptureConfig, CaptureError, CaptureFrame, CaptureHandle, CaptureSource,
    PlaybackError, PlaybackOutput, PlaybackScheduler,
};
use crate::session::state::{ConnectionState, SharedState};
use crate::session::transport::{
    LiveAudioTransport, LiveConnection, LiveSessionConfig, SessionEvent, TransportError,
};

// ---------------------------------------------------------------------------
// SessionOptions
// ---------------------------------------------------------------------------

/// Default agent-speaking quiescence window, in milliseconds.
pub const DEFAULT_AGENT_QUIET_MS: u64 = 500;

/// Everything fixed for the lifetime of a controller.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Provider session parameters (model, voice, prompt, rates).
    pub live: LiveSessionConfig,
    /// Capture pipeline parameters (block size, RMS threshold).
    pub capture: CaptureConfig,
    /// How long after the last audio chunk `agent_speaking` stays true.
    ///
    /// A heuristic, not a protocol guarantee — hence configurable.
    pub agent_quiet: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            live: LiveSessionConfig::default(),
            capture: CaptureConfig::default(),
            agent_quiet: Duration::from_millis(DEFAULT_AGENT_QUIET_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors surfaced by [`SessionController::start`].
///
/// All are terminal for the attempted session: the controller is back in a
/// clean idle state when one of these is returned, and no retry happens
/// automatically.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already connecting or connected.
    #[error("a conversation is already active")]
    AlreadyActive,

    /// Microphone access failed (permission denied, device unavailable).
    #[error("microphone unavailable: {0}")]
    Microphone(#[from] CaptureError),

    /// Audio output could not be opened.
    #[error("audio output unavailable: {0}")]
    Playback(#[from] PlaybackError),

    /// The provider handshake failed.
    #[error("connection failed: {0}")]
    Connect(#[from] TransportError),

    /// `stop()` was issued while this `start()` was still pending.
    #[error("session start was cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// The one object that owns live sessions.  At most one session is alive at
/// a time; `start()` while active is rejected, never stacked.
///
/// All methods take `&self`; the controller is meant to be shared (`Arc`)
/// between the UI action handlers.
pub struct SessionController {
    options: SessionOptions,
    transport: Arc<dyn LiveAudioTransport>,
    capture: Arc<dyn CaptureSource>,
    output: Arc<dyn PlaybackOutput>,
    state: SharedState,
    /// Claimed by `start()`, bumped by `stop()` and by the event loop's own
    /// teardown.  Any mismatch means the session attempt is stale.
    epoch: Arc<AtomicU64>,
    active: Mutex<Option<ActiveSession>>,
}

/// Handle to the running event loop, replaced as a unit on every lifecycle
/// transition.
struct ActiveSession {
    task: JoinHandle<()>,
}

impl SessionController {
    pub fn new(
        options: SessionOptions,
        transport: Arc<dyn LiveAudioTransport>,
        capture: Arc<dyn CaptureSource>,
        output: Arc<dyn PlaybackOutput>,
        state: SharedState,
    ) -> Self {
        Self {
            options,
            transport,
            capture,
            output,
            state,
            epoch: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Shared room state read by the UI.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Current lifecycle phase.
    pub fn connection(&self) -> ConnectionState {
        self.state.lock().unwrap().connection
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Open a live session.  Valid only from idle.
    ///
    /// Suspends on the microphone permission prompt and the provider
    /// handshake; a `stop()` issued while suspended wins, and this call then
    /// returns [`SessionError::Cancelled`] after releasing whatever partial
    /// state it had built.
    ///
    /// On failure the room is left idle with `error_message` set — exactly
    /// the state `stop()` would have produced.
    pub async fn start(&self) -> Result<(), SessionError> {
        let my_epoch = {
            let mut st = self.state.lock().unwrap();
            if st.connection.is_active() {
                return Err(SessionError::AlreadyActive);
            }
            st.connection = ConnectionState::Connecting;
            st.error_message = None;
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        log::info!("session: starting (epoch {my_epoch})");

        // 1. Audio output first — cheap, and playback must be ready before
        //    the first inbound chunk.
        let (sink, clock) = match self.output.open(self.options.live.output_sample_rate) {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail(my_epoch, SessionError::Playback(e))),
        };
        let scheduler = PlaybackScheduler::new(sink, clock);

        // 2. Microphone.  Frames start flowing now; the channel holds a
        //    single frame, so anything the loop is not draining is dropped,
        //    never queued.
        let (frame_tx, frame_rx) = mpsc::channel::<CaptureFrame>(1);
        let capture_handle = match self.capture.open(&self.options.capture, frame_tx) {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(my_epoch, SessionError::Microphone(e))),
        };

        // 3. Provider handshake — the long suspension stop() can race with.
        let connection = match self.transport.connect(&self.options.live).await {
            Ok(conn) => conn,
            Err(e) => return Err(self.fail(my_epoch, SessionError::Connect(e))),
        };

        // Publish Connected before the event loop exists, atomically with
        // the final epoch check.  Any competing teardown bumps the epoch
        // before it touches the state, so whichever side owns the epoch
        // also owns the state — Connected can never land after an Idle
        // written by this session's own teardown.
        let mut active = self.active.lock().unwrap();
        {
            let mut st = self.state.lock().unwrap();
            if self.epoch.load(Ordering::SeqCst) != my_epoch {
                // stop() ran while we were suspended; partial resources
                // drop here.
                log::info!("session: start cancelled by stop()");
                return Err(SessionError::Cancelled);
            }
            st.connection = ConnectionState::Connected;
        }

        let task = tokio::spawn(run_loop(LoopInput {
            connection,
            frames: frame_rx,
            capture: capture_handle,
            scheduler,
            state: Arc::clone(&self.state),
            epoch: Arc::clone(&self.epoch),
            my_epoch,
            agent_quiet: self.options.agent_quiet,
            output_rate: self.options.live.output_sample_rate,
        }));
        *active = Some(ActiveSession { task });

        log::info!("session: connected");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // stop
    // -----------------------------------------------------------------------

    /// End the session.  Valid from any state, idempotent, never fails.
    ///
    /// Synchronous from the caller's perspective: the event loop is aborted
    /// and every owned handle (microphone, output stream, connection) is
    /// released by drop; the network close completes fire-and-forget.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(session) = self.active.lock().unwrap().take() {
            session.task.abort();
        }

        let mut st = self.state.lock().unwrap();
        st.connection = ConnectionState::Idle;
        st.user_speaking = false;
        st.agent_speaking = false;
        log::info!("session: stopped");
    }

    /// Publish a start failure, unless a newer epoch already owns the state.
    fn fail(&self, my_epoch: u64, err: SessionError) -> SessionError {
        log::error!("session: start failed: {err}");
        if self.epoch.load(Ordering::SeqCst) == my_epoch {
            let mut st = self.state.lock().unwrap();
            st.connection = ConnectionState::Idle;
            st.user_speaking = false;
            st.agent_speaking = false;
            st.error_message = Some(err.to_string());
        }
        err
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Release the session without touching shared state; observers may
        // outlive the controller.
        if let Some(session) = self.active.lock().unwrap().take() {
            session.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Everything the event loop owns for one session lifetime.  Dropped as a
/// unit on exit or abort — no field survives into the next session.
struct LoopInput {
    connection: LiveConnection,
    frames: mpsc::Receiver<CaptureFrame>,
    capture: Box<dyn CaptureHandle>,
    scheduler: PlaybackScheduler,
    state: SharedState,
    epoch: Arc<AtomicU64>,
    my_epoch: u64,
    agent_quiet: Duration,
    output_rate: u32,
}

async fn run_loop(input: LoopInput) {
    let LoopInput {
        mut connection,
        mut frames,
        capture,
        mut scheduler,
        state,
        epoch,
        my_epoch,
        agent_quiet,
        output_rate,
    } = input;

    // Deadline for clearing agent_speaking, restarted on every chunk so a
    // stale timer can never clear the flag mid-utterance.
    let mut quiet_deadline: Option<tokio::time::Instant> = None;

    let failure: Option<String> = loop {
        tokio::select! {
            maybe_frame = frames.recv() => match maybe_frame {
                Some(frame) => {
                    {
                        let mut st = state.lock().unwrap();
                        st.user_speaking = frame.speaking;
                    }
                    connection.send_audio(frame.pcm);
                }
                None => {
                    break Some("microphone capture stopped unexpectedly".to_string());
                }
            },

            maybe_event = connection.next_event() => match maybe_event {
                Some(SessionEvent::AudioChunk { data }) => {
                    {
                        let mut st = state.lock().unwrap();
                        st.agent_speaking = true;
                    }
                    quiet_deadline = Some(tokio::time::Instant::now() + agent_quiet);

                    match decode_pcm16(&data, output_rate, 1) {
                        Ok(buffer) => {
                            let start = scheduler.enqueue(buffer);
                            log::trace!("session: chunk scheduled at {start:.3}s");
                        }
                        // One malformed frame must not kill the conversation.
                        Err(e) => log::warn!("session: dropping undecodable chunk: {e}"),
                    }
                }
                Some(SessionEvent::Interrupted) => {
                    log::debug!("session: user barged in, dropping queued speech");
                    scheduler.interrupt();
                    {
                        let mut st = state.lock().unwrap();
                        st.agent_speaking = false;
                    }
                    quiet_deadline = None;
                }
                Some(SessionEvent::Closed) | None => break None,
                Some(SessionEvent::Error { message }) => break Some(message),
            },

            _ = tokio::time::sleep_until(
                quiet_deadline.unwrap_or_else(tokio::time::Instant::now)
            ), if quiet_deadline.is_some() => {
                {
                    let mut st = state.lock().unwrap();
                    st.agent_speaking = false;
                }
                quiet_deadline = None;
            }
        }
    };

    // Release the microphone and playback before publishing the transition.
    drop(capture);
    drop(scheduler);
    drop(connection);

    // Publish teardown only if no stop()/start() superseded this session.
    if epoch
        .compare_exchange(my_epoch, my_epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let mut st = state.lock().unwrap();
        st.connection = ConnectionState::Idle;
        st.user_speaking = false;
        st.agent_speaking = false;
        match failure {
            Some(message) => {
                log::error!("session: ended with error: {message}");
                st.error_message = Some(message);
            }
            None => log::info!("session: closed by provider"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
