//! Generation capability.
//!
//! Workflows talk to the external generative model only through the
//! [`GenerationClient`] trait. The model may be slow and may fail; it has no
//! side effects of its own.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Flashcard, Question, QuestionMix, QuizContent};

// Re-export the HTTP client
pub use http::{HttpGenerationClient, HttpGenerationConfig};

/// Failures reported by the generation capability
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Model rate limit reached")]
    RateLimited,

    #[error("Model API key was rejected")]
    InvalidKey,

    #[error("Model quota exceeded")]
    QuotaExceeded,

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Request to model failed: {0}")]
    Transport(String),

    #[error("Model response could not be parsed: {0}")]
    MalformedResponse(String),
}

impl GenerationError {
    /// Whether waiting could plausibly fix the failure
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidKey | Self::QuotaExceeded)
    }
}

/// The external generative model
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Produce chapter notes
    async fn generate_notes(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Produce front/back flashcard pairs
    async fn generate_flashcards(&self, prompt: &str) -> Result<Vec<Flashcard>, GenerationError>;

    /// Produce multiple-choice questions with an answer key
    async fn generate_quiz(&self, prompt: &str) -> Result<QuizContent, GenerationError>;

    /// Produce a question set following the given mix
    async fn generate_mixed_test(
        &self,
        prompt: &str,
        mix: QuestionMix,
    ) -> Result<Vec<Question>, GenerationError>;
}
