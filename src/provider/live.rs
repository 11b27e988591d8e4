//! Gemini Live transport — bidirectional audio over WebSocket.
//!
//! Implements [`LiveAudioTransport`] against the
//! `BidiGenerateContent` endpoint:
//!
//! 1. open the WebSocket with the API key in the query string,
//! 2. send the `setup` message (model, AUDIO modality, voice, system
//!    instruction) and wait for `setupComplete`,
//! 3. split the socket — a writer task wraps outbound PCM frames in
//!    `realtimeInput` messages, a reader task translates `serverContent`
//!    into [`SessionEvent`]s.
//!
//! Both tasks end when their channel side closes, so dropping the
//! [`LiveConnection`] tears the socket down without anyone awaiting it.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use async_trait::async_trait;

use crate::session::{LiveAudioTransport, LiveConnection, LiveSessionConfig, SessionEvent, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const BIDI_PATH: &str = "ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Depth of the outbound PCM channel.  Small on purpose: a slow socket
/// drops frames instead of accumulating stale audio.
const OUTBOUND_DEPTH: usize = 8;

/// Depth of the inbound event channel.
const EVENT_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// GeminiLiveTransport
// ---------------------------------------------------------------------------

/// The production [`LiveAudioTransport`].
pub struct GeminiLiveTransport {
    host: String,
    api_key: String,
}

impl GeminiLiveTransport {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("wss://{}/{}?key={}", self.host, BIDI_PATH, self.api_key)
    }
}

#[async_trait]
impl LiveAudioTransport for GeminiLiveTransport {
    async fn connect(&self, config: &LiveSessionConfig) -> Result<LiveConnection, TransportError> {
        log::info!("live: connecting to {} ({})", self.host, config.model);

        let (mut ws, _response) = connect_async(self.endpoint())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        // Handshake: setup, then wait for the acknowledgement before any
        // audio flows.
        let setup = setup_message(config);
        ws.send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        await_setup_complete(&mut ws).await?;
        log::info!("live: session established");

        let (ws_write, ws_read) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_DEPTH);

        let input_rate = config.input_sample_rate;
        tokio::spawn(write_loop(ws_write, outbound_rx, input_rate));
        tokio::spawn(read_loop(ws_read, event_tx));

        Ok(LiveConnection::new(outbound_tx, event_rx))
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

fn setup_message(config: &LiveSessionConfig) -> serde_json::Value {
    serde_json::json!({
        "setup": {
            "model": format!("models/{}", config.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_prompt }]
            }
        }
    })
}

/// Read frames until `setupComplete` arrives.  Anything else first is a
/// protocol violation.
async fn await_setup_complete(ws: &mut WsStream) -> Result<(), TransportError> {
    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| TransportError::Handshake(e.to_string()))?;
        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|e| TransportError::Protocol(e.to_string()))?,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(reason) => {
                return Err(TransportError::Handshake(format!(
                    "closed during setup: {reason:?}"
                )))
            }
            Message::Frame(_) => continue,
        };

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if value.get("setupComplete").is_some() {
            return Ok(());
        }
        return Err(TransportError::Handshake(format!(
            "unexpected frame before setupComplete: {text}"
        )));
    }
    Err(TransportError::Handshake(
        "socket closed before setupComplete".into(),
    ))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

async fn write_loop(
    mut ws_write: futures_util::stream::SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    input_rate: u32,
) {
    let mime = format!("audio/pcm;rate={input_rate}");
    while let Some(pcm) = outbound.recv().await {
        let message = serde_json::json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": mime,
                    "data": B64.encode(&pcm)
                }]
            }
        });
        if let Err(e) = ws_write.send(Message::Text(message.to_string())).await {
            log::debug!("live: writer stopping: {e}");
            break;
        }
    }
    // Connection dropped — close fire-and-forget.
    let _ = ws_write.send(Message::Close(None)).await;
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

async fn read_loop(
    mut ws_read: futures_util::stream::SplitStream<WsStream>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(frame) = ws_read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("live: non-utf8 frame dropped: {e}");
                    continue;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                let _ = events
                    .send(SessionEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        for event in parse_server_message(&text) {
            if events.send(event).await.is_err() {
                // Session side hung up; stop reading.
                return;
            }
        }
    }
    let _ = events.send(SessionEvent::Closed).await;
}

/// Translate one server message into zero or more session events.
///
/// `interrupted` is surfaced before any audio parts of the same message:
/// queued speech must be dropped before new speech is scheduled.
fn parse_server_message(text: &str) -> Vec<SessionEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("live: unparseable frame dropped: {e}");
            return Vec::new();
        }
    };

    let Some(content) = value.get("serverContent") else {
        // goAway, usageMetadata etc. — nothing the session reacts to.
        return Vec::new();
    };

    let mut events = Vec::new();

    if content
        .get("interrupted")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        events.push(SessionEvent::Interrupted);
    }

    if let Some(parts) = content
        .get("modelTurn")
        .and_then(|turn| turn.get("parts"))
        .and_then(|parts| parts.as_array())
    {
        for part in parts {
            let Some(data) = part
                .get("inlineData")
                .and_then(|inline| inline.get("data"))
                .and_then(|data| data.as_str())
            else {
                continue;
            };
            match B64.decode(data) {
                Ok(bytes) => events.push(SessionEvent::AudioChunk { data: bytes }),
                Err(e) => log::warn!("live: undecodable audio part dropped: {e}"),
            }
        }
    }

    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
