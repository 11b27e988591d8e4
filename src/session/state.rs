//! Session state machine and shared room state.
//!
//! [`ConnectionState`] tracks the live session lifecycle.  The UI reads it
//! via [`SharedState`] to render the call button and speaking indicators.
//!
//! [`RoomState`] is the single source of truth for everything the voice-room
//! view needs: connection phase, the two turn signals, and any error message.
//!
//! [`SharedState`] is a type alias for `Arc<Mutex<RoomState>>` — cheap to
//! clone and safe to share between the controller, its event loop task, and
//! the UI.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Lifecycle states of the live voice session.
///
/// ```text
/// Idle ──start()──▶ Connecting ──handshake ok──▶ Connected
///   ▲                   │                            │
///   └──── teardown ◀────┴─── stop() / remote close / error
/// ```
///
/// Remote close and mid-session errors are terminal for that session: they
/// run the same full teardown as `stop()` and land back in `Idle` (with
/// `error_message` set on the error path).  A fresh `start()` is required to
/// reconnect; there is no auto-reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; the room is waiting for "Start Conversation".
    Idle,

    /// Microphone and handshake in flight.
    Connecting,

    /// Bidirectional audio is live.
    Connected,
}

impl ConnectionState {
    /// Returns `true` while a session is starting or live.
    ///
    /// `start()` is rejected whenever this is `true` — at most one session
    /// exists per room.
    ///
    /// ```
    /// use voice_lounge::session::ConnectionState;
    ///
    /// assert!(!ConnectionState::Idle.is_active());
    /// assert!(ConnectionState::Connecting.is_active());
    /// assert!(ConnectionState::Connected.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// A short human-readable label for the status line.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// Shared voice-room state — the single source of truth for the UI.
///
/// The session controller and its event loop mutate it; the view reads it.
/// Turn signals are derived, never persisted, and are both forced to `false`
/// on any transition out of `Connected`.
#[derive(Debug, Default)]
pub struct RoomState {
    /// Current session lifecycle phase.
    pub connection: ConnectionState,

    /// `true` while the current capture block's RMS energy exceeds the
    /// speaking threshold.  Recomputed every block, no hysteresis.
    pub user_speaking: bool,

    /// `true` from the arrival of an agent audio chunk until the quiescence
    /// timeout elapses with no further chunks.
    pub agent_speaking: bool,

    /// User-visible message for the most recent session failure.
    ///
    /// Set on microphone/connection/runtime errors; cleared when a new
    /// `start()` is attempted.
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`RoomState`].
///
/// Cheap to clone (`Arc` clone).  Lock for short critical sections only; do
/// **not** hold the lock across `.await` points.
pub type SharedState = Arc<Mutex<RoomState>>;

/// Construct a new [`SharedState`] wrapping a default [`RoomState`].
pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(RoomState::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
