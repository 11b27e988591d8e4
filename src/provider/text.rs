//! Text generation — request/response and request/stream contracts.
//!
//! [`GeminiTextClient`] calls the `generateContent` and
//! `streamGenerateContent` REST endpoints.  The chat companion sends the
//! whole conversation each turn and renders the streamed reply
//! fragment-by-fragment; the trivia generator reuses the same request shape
//! with a structured-output `generationConfig` bolted on.

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ProviderConfig;

// ---------------------------------------------------------------------------
// GenerateError
// ---------------------------------------------------------------------------

/// Errors that can occur during text generation.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("generation request timed out")]
    Timeout,

    /// The HTTP response could not be parsed as expected JSON.
    #[error("failed to parse generation response: {0}")]
    Parse(String),

    /// The provider returned a response with no usable text content.
    #[error("provider returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for GenerateError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerateError::Timeout
        } else {
            GenerateError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ChatTurn
// ---------------------------------------------------------------------------

/// Who produced a turn.  The wire format knows exactly these two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn wire_name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One message in a conversation, oldest first.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TextGenerator trait
// ---------------------------------------------------------------------------

/// Async trait for conversational text generation.
///
/// Implementors must be `Send + Sync` so they can be shared across tasks
/// (e.g. wrapped in `Arc<dyn TextGenerator>`).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Full conversation in, complete reply out.
    async fn generate(&self, system: &str, turns: &[ChatTurn]) -> Result<String, GenerateError>;

    /// Full conversation in, reply streamed out as text fragments in order.
    ///
    /// The channel closes when the reply is complete; a mid-stream failure
    /// is delivered as a final `Err` fragment.
    async fn generate_stream(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<mpsc::Receiver<Result<String, GenerateError>>, GenerateError>;
}

// ---------------------------------------------------------------------------
// GeminiTextClient
// ---------------------------------------------------------------------------

/// Calls the Gemini `generateContent` / `streamGenerateContent` endpoints.
///
/// All connection details (`base_url`, `api_key`, `text_model`) come
/// exclusively from the [`ProviderConfig`] passed to
/// [`GeminiTextClient::from_config`].
pub struct GeminiTextClient {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl GeminiTextClient {
    /// Build a client from application config.
    ///
    /// The HTTP client is pre-configured with the per-request timeout from
    /// `config.timeout_secs`.  A default (no-timeout) client is used as a
    /// last-resort fallback if the builder fails (should never happen in
    /// practice).
    pub fn from_config(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}?key={}",
            self.config.base_url,
            self.config.text_model,
            method,
            self.config.resolved_api_key()
        )
    }

    /// Request body shared by the plain and streaming endpoints.
    pub(crate) fn request_body(system: &str, turns: &[ChatTurn]) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = turns
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.wire_name(),
                    "parts": [{ "text": turn.text }]
                })
            })
            .collect();

        serde_json::json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": system }] }
        })
    }

    /// Text generation with an explicit `generationConfig` — the structured
    /// output path used by the trivia generator.
    pub(crate) async fn generate_with_config(
        &self,
        system: &str,
        turns: &[ChatTurn],
        generation_config: serde_json::Value,
    ) -> Result<String, GenerateError> {
        let mut body = Self::request_body(system, turns);
        body["generationConfig"] = generation_config;

        let response = self
            .client
            .post(self.url("generateContent"))
            .json(&body)
            .send()
            .await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerateError::Parse(e.to_string()))?;

        extract_text(&json).ok_or(GenerateError::EmptyResponse)
    }
}

/// Pull the reply text out of one `generateContent` response value.
pub(crate) fn extract_text(json: &serde_json::Value) -> Option<String> {
    let text = json["candidates"][0]["content"]["parts"][0]["text"].as_str()?;
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

#[async_trait]
impl TextGenerator for GeminiTextClient {
    async fn generate(&self, system: &str, turns: &[ChatTurn]) -> Result<String, GenerateError> {
        let body = Self::request_body(system, turns);

        let response = self
            .client
            .post(self.url("generateContent"))
            .json(&body)
            .send()
            .await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerateError::Parse(e.to_string()))?;

        extract_text(&json).ok_or(GenerateError::EmptyResponse)
    }

    async fn generate_stream(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<mpsc::Receiver<Result<String, GenerateError>>, GenerateError> {
        let body = Self::request_body(system, turns);

        let response = self
            .client
            .post(format!("{}&alt=sse", self.url("streamGenerateContent")))
            .json(&body)
            .send()
            .await?;

        let (tx, rx) = mpsc::channel(16);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            // SSE frames can split anywhere, so accumulate and cut on
            // newlines ourselves.
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(GenerateError::from(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() || payload == "[DONE]" {
                        continue;
                    }

                    match serde_json::from_str::<serde_json::Value>(payload) {
                        Ok(json) => {
                            if let Some(fragment) = extract_text(&json) {
                                if tx.send(Ok(fragment)).await.is_err() {
                                    return; // reader hung up
                                }
                            }
                        }
                        Err(e) => log::warn!("text: unparseable stream frame dropped: {e}"),
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> ProviderConfig {
        ProviderConfig {
            api_key: "test-key".into(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn url_carries_model_method_and_key() {
        let client = GeminiTextClient::from_config(&make_config());
        let url = client.url("generateContent");
        assert!(url.contains("/v1beta/models/gemini-2.5-flash:generateContent"));
        assert!(url.ends_with("?key=test-key"));
    }

    #[test]
    fn request_body_orders_turns_and_roles() {
        let turns = vec![
            ChatTurn::user("hi"),
            ChatTurn::model("hello!"),
            ChatTurn::user("tell me a joke"),
        ];
        let body = GeminiTextClient::request_body("be funny", &turns);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be funny");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "tell me a joke");
    }

    #[test]
    fn extract_text_reads_first_candidate() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "a reply" }] }
            }]
        });
        assert_eq!(extract_text(&json).as_deref(), Some("a reply"));
    }

    #[test]
    fn extract_text_rejects_empty_and_missing() {
        let empty = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "" }] } }]
        });
        assert!(extract_text(&empty).is_none());
        assert!(extract_text(&serde_json::json!({})).is_none());
        assert!(extract_text(&serde_json::json!({"error": {"message": "quota"}})).is_none());
    }

    /// Verify that `GeminiTextClient` is object-safe (usable as
    /// `dyn TextGenerator`).
    #[test]
    fn client_is_object_safe() {
        let client: Box<dyn TextGenerator> = Box::new(GeminiTextClient::from_config(&make_config()));
        drop(client);
    }
}
