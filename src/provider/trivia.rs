//! Structured trivia generation.
//!
//! Same request/response contract as the chat path, plus a
//! `generationConfig` that pins the output to JSON matching a fixed schema.
//! Malformed or missing JSON is a recoverable condition: the caller gets a
//! default (empty) question and a warning in the log, never an error that
//! would break the surrounding flow.

use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::provider::text::{ChatTurn, GeminiTextClient, GenerateError};

// ---------------------------------------------------------------------------
// TriviaQuestion
// ---------------------------------------------------------------------------

/// One generated question, deserialised straight from the provider's JSON.
///
/// `#[serde(default)]` on every field: a partially-valid object still
/// yields a usable value instead of a parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriviaQuestion {
    pub question: String,
    /// Answer choices; the schema asks for exactly four.
    pub options: Vec<String>,
    /// Must match one entry of `options` verbatim.
    pub correct_answer: String,
    pub difficulty: String,
}

impl TriviaQuestion {
    /// A default question carries no content; the UI treats it as
    /// "generation failed, try again".
    pub fn is_empty(&self) -> bool {
        self.question.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TriviaGenerator
// ---------------------------------------------------------------------------

/// Generates trivia questions via structured output.
pub struct TriviaGenerator {
    client: GeminiTextClient,
}

impl TriviaGenerator {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            client: GeminiTextClient::from_config(config),
        }
    }

    /// Ask for one question about `topic` at `difficulty`.
    ///
    /// Transport failures still surface as errors; a reply that is not valid
    /// JSON degrades to [`TriviaQuestion::default`].
    pub async fn generate(
        &self,
        topic: &str,
        difficulty: &str,
    ) -> Result<TriviaQuestion, GenerateError> {
        let prompt = format!(
            "Generate one {difficulty} multiple-choice trivia question about {topic}. \
             Provide exactly four options and make correctAnswer match one of them verbatim."
        );
        let turns = [ChatTurn::user(prompt)];

        let text = self
            .client
            .generate_with_config("", &turns, response_schema())
            .await?;

        Ok(parse_question(&text))
    }
}

/// The structured-output contract sent with every trivia request.
fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "responseMimeType": "application/json",
        "responseSchema": {
            "type": "OBJECT",
            "properties": {
                "question":      { "type": "STRING" },
                "options":       { "type": "ARRAY", "items": { "type": "STRING" } },
                "correctAnswer": { "type": "STRING" },
                "difficulty":    { "type": "STRING" }
            },
            "required": ["question", "options", "correctAnswer", "difficulty"]
        }
    })
}

/// Parse the reply, degrading to a default question on malformed JSON.
fn parse_question(text: &str) -> TriviaQuestion {
    match serde_json::from_str::<TriviaQuestion>(text) {
        Ok(question) => question,
        Err(e) => {
            log::warn!("trivia: malformed question JSON, using default: {e}");
            TriviaQuestion::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
