//! Live session layer — lifecycle controller, shared room state, and the
//! transport seam the provider implementations plug into.

pub mod controller;
pub mod state;
pub mod transport;

pub use controller::{SessionController, SessionError, SessionOptions, DEFAULT_AGENT_QUIET_MS};
pub use state::{new_shared_state, ConnectionState, RoomState, SharedState};
pub use transport::{
    LiveAudioTransport, LiveConnection, LiveSessionConfig, SessionEvent, TransportError,
};
