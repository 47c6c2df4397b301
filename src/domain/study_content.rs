//! Study-type content (flashcards, quizzes) filled in by single-shot workflows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyType {
    #[serde(alias = "Flashcard", alias = "flashcards")]
    Flashcard,
    #[serde(alias = "Quiz")]
    Quiz,
}

impl StudyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flashcard => "flashcard",
            Self::Quiz => "quiz",
        }
    }
}

impl fmt::Display for StudyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flashcard" => Ok(Self::Flashcard),
            "quiz" => Ok(Self::Quiz),
            other => Err(format!("unknown study type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentStatus {
    Generating,
    Ready,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "Generating",
            Self::Ready => "Ready",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Generating" => Ok(Self::Generating),
            "Ready" => Ok(Self::Ready),
            other => Err(format!("unknown content status: {}", other)),
        }
    }
}

/// A placeholder record created by the external layer and completed by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyTypeContentRecord {
    pub id: String,
    pub course_id: String,
    pub study_type: StudyType,

    /// Opaque generated content, `None` until generation completes
    pub content: Option<serde_json::Value>,

    pub status: ContentStatus,
}

impl StudyTypeContentRecord {
    /// A fresh placeholder awaiting generation
    pub fn placeholder(
        id: impl Into<String>,
        course_id: impl Into<String>,
        study_type: StudyType,
    ) -> Self {
        Self {
            id: id.into(),
            course_id: course_id.into(),
            study_type,
            content: None,
            status: ContentStatus::Generating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuizContent {
    pub questions: Vec<QuizQuestion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_study_type_accepts_legacy_spellings() {
        let parsed: StudyType = serde_json::from_str(r#""Flashcard""#).unwrap();
        assert_eq!(parsed, StudyType::Flashcard);

        let parsed: StudyType = serde_json::from_str(r#""quiz""#).unwrap();
        assert_eq!(parsed, StudyType::Quiz);
    }

    #[test]
    fn test_placeholder_is_generating() {
        let record = StudyTypeContentRecord::placeholder("r-1", "c-1", StudyType::Quiz);
        assert_eq!(record.status, ContentStatus::Generating);
        assert!(record.content.is_none());
    }
}
