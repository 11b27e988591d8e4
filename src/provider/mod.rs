//! Gemini provider clients.
//!
//! Three contracts against the same provider:
//! - [`GeminiLiveTransport`] — bidirectional audio over WebSocket,
//! - [`GeminiTextClient`] — request/response and request/stream text,
//! - [`TriviaGenerator`] — structured JSON output with a fixed schema.

pub mod live;
pub mod text;
pub mod trivia;

pub use live::GeminiLiveTransport;
pub use text::{ChatTurn, GeminiTextClient, GenerateError, Role, TextGenerator};
pub use trivia::{TriviaGenerator, TriviaQuestion};
