//! The provider session seam.
//!
//! The live audio session is reached exclusively through the
//! [`LiveAudioTransport`] trait, so the session controller can be tested
//! against a fake transport instead of a real network connection.  The real
//! implementation is [`crate::provider::GeminiLiveTransport`].
//!
//! A successful `connect` yields a [`LiveConnection`]: a channel pair whose
//! outbound side carries encoded 16 kHz PCM frames and whose inbound side
//! delivers [`SessionEvent`]s in arrival order.  Dropping the connection
//! closes the underlying transport fire-and-forget — the caller never waits
//! on the network close.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// LiveSessionConfig
// ---------------------------------------------------------------------------

/// Fixed parameters of one live session, negotiated at connect time.
#[derive(Debug, Clone)]
pub struct LiveSessionConfig {
    /// Provider model identifier for the bidirectional audio session.
    pub model: String,
    /// Prebuilt voice id used for agent speech.
    pub voice: String,
    /// System prompt establishing the agent persona.
    pub system_prompt: String,
    /// Sample rate of outbound microphone PCM (16 000 Hz).
    pub input_sample_rate: u32,
    /// Sample rate of inbound agent PCM (24 000 Hz, provider-defined).
    pub output_sample_rate: u32,
}

/// The one place the live-session defaults live; the config layer and
/// [`crate::session::SessionOptions`] both derive from it.
impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice: "Kore".into(),
            system_prompt: "You are a warm, engaging host in a social voice lounge. \
                            Speak concisely."
                .into(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Inbound events from the provider, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An opaque block of encoded agent audio (16-bit PCM at the session's
    /// output rate).  Ownership transfers to the decode/schedule buffer.
    AudioChunk { data: Vec<u8> },

    /// The user barged in; queued agent speech must be dropped.
    Interrupted,

    /// The provider closed the session.
    Closed,

    /// The provider signalled a fatal mid-session error.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Errors raised while establishing or using the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The network connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection opened but the session handshake was rejected.
    #[error("session handshake failed: {0}")]
    Handshake(String),

    /// An inbound frame could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// LiveConnection
// ---------------------------------------------------------------------------

/// One open bidirectional session.
///
/// Single-writer on the outbound side (the capture pipeline, via the event
/// loop) and single-reader on the inbound side (the event loop).
pub struct LiveConnection {
    outbound: mpsc::Sender<Vec<u8>>,
    events: mpsc::Receiver<SessionEvent>,
}

impl LiveConnection {
    pub fn new(outbound: mpsc::Sender<Vec<u8>>, events: mpsc::Receiver<SessionEvent>) -> Self {
        Self { outbound, events }
    }

    /// Forward one encoded PCM frame, dropping it when the writer is not
    /// keeping up or the connection is gone.  Stale audio is never queued.
    pub fn send_audio(&self, pcm: Vec<u8>) {
        if self.outbound.try_send(pcm).is_err() {
            log::trace!("transport: outbound frame dropped");
        }
    }

    /// Next inbound event; `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }
}

// ---------------------------------------------------------------------------
// LiveAudioTransport
// ---------------------------------------------------------------------------

/// Async factory for live sessions.
///
/// Implementors must be `Send + Sync` so the controller can hold one behind
/// `Arc<dyn LiveAudioTransport>`.  `connect` returns only after the session
/// handshake is acknowledged — once it resolves, audio may flow both ways.
#[async_trait]
pub trait LiveAudioTransport: Send + Sync {
    async fn connect(&self, config: &LiveSessionConfig) -> Result<LiveConnection, TransportError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_delivers_events_in_order() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (event_tx, event_rx) = mpsc::channel(4);
        let mut conn = LiveConnection::new(out_tx, event_rx);

        event_tx
            .send(SessionEvent::AudioChunk { data: vec![1, 2] })
            .await
            .unwrap();
        event_tx.send(SessionEvent::Interrupted).await.unwrap();
        event_tx.send(SessionEvent::Closed).await.unwrap();
        drop(event_tx);

        assert_eq!(
            conn.next_event().await,
            Some(SessionEvent::AudioChunk { data: vec![1, 2] })
        );
        assert_eq!(conn.next_event().await, Some(SessionEvent::Interrupted));
        assert_eq!(conn.next_event().await, Some(SessionEvent::Closed));
        assert_eq!(conn.next_event().await, None);
    }

    #[tokio::test]
    async fn send_audio_drops_when_outbound_full() {
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let (_event_tx, event_rx) = mpsc::channel(1);
        let conn = LiveConnection::new(out_tx, event_rx);

        conn.send_audio(vec![1]);
        conn.send_audio(vec![2]); // dropped, channel holds one frame
        conn.send_audio(vec![3]); // dropped

        assert_eq!(out_rx.recv().await, Some(vec![1]));
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn send_audio_tolerates_closed_connection() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (_event_tx, event_rx) = mpsc::channel(1);
        let conn = LiveConnection::new(out_tx, event_rx);

        drop(out_rx);
        conn.send_audio(vec![1]); // must not panic
    }
}
