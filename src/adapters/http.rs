//! HTTP generation client for OpenAI-compatible chat-completion endpoints.
//!
//! Structured content (flashcards, quizzes, question sets) is requested as a
//! JSON object and decoded with serde; notes are returned as plain text.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GenerationClient, GenerationError};
use crate::domain::{Flashcard, Question, QuestionMix, QuizContent};

const NOTES_INSTRUCTIONS: &str =
    "You write detailed, well-structured study notes in HTML. Respond with the notes only.";
const JSON_INSTRUCTIONS: &str =
    "You generate study material. Respond with a single JSON object and nothing else.";

/// Connection settings for the generation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpGenerationConfig {
    /// Base URL, e.g. "https://api.openai.com/v1"
    pub base_url: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Bearer token (read from the environment, never from config files)
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Per-request timeout
    pub timeout_seconds: u64,
}

/// Generation client speaking the chat-completions protocol
pub struct HttpGenerationClient {
    config: HttpGenerationConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlashcardSet {
    flashcards: Vec<Flashcard>,
}

#[derive(Debug, Deserialize)]
struct QuestionSet {
    questions: Vec<Question>,
}

impl HttpGenerationClient {
    /// Create a new client
    pub fn new(config: HttpGenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Send one chat completion and return the reply text
    async fn complete(&self, instructions: &str, prompt: &str, json: bool) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: instructions,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: json.then_some(ResponseFormat { kind: "json_object" }),
        };

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::ModelUnavailable(format!("request timed out: {}", e))
            } else {
                GenerationError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::MalformedResponse("response has no content".to_string()))?;

        debug!(model = %self.config.model, bytes = content.len(), "Model replied");
        Ok(content)
    }

    async fn complete_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, GenerationError> {
        let content = self.complete(JSON_INSTRUCTIONS, prompt, true).await?;
        parse_json_reply(&content)
    }
}

/// Map a non-success HTTP status to a generation error
fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::InvalidKey,
        StatusCode::PAYMENT_REQUIRED => GenerationError::QuotaExceeded,
        StatusCode::TOO_MANY_REQUESTS if body.contains("quota") => GenerationError::QuotaExceeded,
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited,
        _ => GenerationError::ModelUnavailable(format!("HTTP {}: {}", status.as_u16(), body.trim())),
    }
}

/// Decode a JSON reply, tolerating markdown code fences around it
fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T, GenerationError> {
    let trimmed = strip_code_fences(content);
    serde_json::from_str(trimmed).map_err(|e| GenerationError::MalformedResponse(e.to_string()))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") on the opening fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate_notes(&self, prompt: &str) -> Result<String, GenerationError> {
        let notes = self.complete(NOTES_INSTRUCTIONS, prompt, false).await?;
        Ok(strip_code_fences(&notes).to_string())
    }

    async fn generate_flashcards(&self, prompt: &str) -> Result<Vec<Flashcard>, GenerationError> {
        let set: FlashcardSet = self.complete_json(prompt).await?;
        Ok(set.flashcards)
    }

    async fn generate_quiz(&self, prompt: &str) -> Result<QuizContent, GenerationError> {
        self.complete_json(prompt).await
    }

    async fn generate_mixed_test(
        &self,
        prompt: &str,
        mix: QuestionMix,
    ) -> Result<Vec<Question>, GenerationError> {
        let set: QuestionSet = self.complete_json(prompt).await?;
        check_question_text(&set.questions)?;

        if set.questions.len() as u32 != mix.total() {
            warn!(
                expected = mix.total(),
                actual = set.questions.len(),
                "Model returned a different number of questions than requested"
            );
        }

        Ok(set.questions)
    }
}

/// Every question needs a prompt the learner can read
fn check_question_text(questions: &[Question]) -> Result<(), GenerationError> {
    match questions.iter().position(|q| q.text().trim().is_empty()) {
        Some(index) => Err(GenerationError::MalformedResponse(format!(
            "question {} has no text",
            index + 1
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpGenerationClient {
        HttpGenerationClient::new(HttpGenerationConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            model: "test-model".to_string(),
            api_key: None,
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(client().completions_url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client().name(), "http");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), GenerationError::InvalidKey));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GenerationError::RateLimited
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, r#"{"error":{"code":"insufficient_quota"}}"#),
            GenerationError::QuotaExceeded
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            GenerationError::ModelUnavailable(_)
        ));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_question_set() {
        let reply = r#"```json
{"questions": [
  {"type": "multiple_choice", "question": "2+2?", "options": ["3", "4"], "answer": "4"},
  {"type": "true_false", "question": "Sky is green", "answer": false},
  {"type": "descriptive", "question": "Explain borrowing", "answer": "References"}
]}
```"#;
        let set: QuestionSet = parse_json_reply(reply).unwrap();
        assert_eq!(set.questions.len(), 3);
        assert_eq!(set.questions[1].text(), "Sky is green");
        assert!(check_question_text(&set.questions).is_ok());
    }

    #[test]
    fn test_blank_question_is_malformed() {
        let reply = r#"{"questions": [
  {"type": "true_false", "question": "Sky is green", "answer": false},
  {"type": "descriptive", "question": "  ", "answer": "References"}
]}"#;
        let set: QuestionSet = parse_json_reply(reply).unwrap();
        match check_question_text(&set.questions) {
            Err(GenerationError::MalformedResponse(msg)) => assert_eq!(msg, "question 2 has no text"),
            other => panic!("expected malformed response, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_reply() {
        let result: Result<QuizContent, _> = parse_json_reply("not json");
        assert!(matches!(result, Err(GenerationError::MalformedResponse(_))));
    }
}
