//! Course records and the course status state machine.
//!
//! Courses are created by the external CRUD layer. The generation pipeline
//! only ever reads `chapters` and moves `status` along
//! `Pending -> Generating -> {Ready | Error}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A course as handed to the chapter generation workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    /// Externally supplied unique id
    pub course_id: String,

    /// Coarse status polled by the rest of the system
    #[serde(default)]
    pub status: CourseStatus,

    /// Ordered chapter layout (`None` when the layout is missing or is not
    /// a list of chapters)
    #[serde(default, deserialize_with = "lenient_chapters")]
    pub chapters: Option<Vec<Chapter>>,

    /// Email of the learner the course was generated for
    #[serde(default)]
    pub created_for: Option<String>,
}

impl CourseRecord {
    /// Create a pending course with the given chapters
    pub fn new(course_id: impl Into<String>, chapters: Vec<Chapter>) -> Self {
        Self {
            course_id: course_id.into(),
            status: CourseStatus::Pending,
            chapters: Some(chapters),
            created_for: None,
        }
    }

    /// Attach the learner email used to resolve practice test ownership
    pub fn with_created_for(mut self, email: impl Into<String>) -> Self {
        self.created_for = Some(email.into());
        self
    }

    /// Chapters if the layout is a non-empty ordered sequence
    pub fn well_formed_chapters(&self) -> Option<&[Chapter]> {
        match self.chapters.as_deref() {
            Some(chapters) if !chapters.is_empty() => Some(chapters),
            _ => None,
        }
    }
}

/// Accept any JSON shape for the layout so a malformed course still reaches
/// the workflow and gets marked `Error` instead of being rejected at intake
fn lenient_chapters<'de, D>(deserializer: D) -> Result<Option<Vec<Chapter>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// A single chapter of a course layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    #[serde(alias = "chapterTitle")]
    pub title: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Chapter {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            topics: Vec::new(),
        }
    }

    pub fn with_topic(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.topics.push(Topic {
            name: name.into(),
            description: description.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(alias = "topicTitle")]
    pub name: String,

    #[serde(default)]
    pub description: String,
}

/// Course status as stored on the course record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CourseStatus {
    Pending,
    Generating,
    Ready,
    Error,
}

impl Default for CourseStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Generating => "Generating",
            Self::Ready => "Ready",
            Self::Error => "Error",
        }
    }

    /// Terminal states are never left by the pipeline
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Generating" => Ok(Self::Generating),
            "Ready" => Ok(Self::Ready),
            "Error" => Ok(Self::Error),
            other => Err(format!("unknown course status: {}", other)),
        }
    }
}

/// A notes record for one chapter of one course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterNotesRecord {
    pub course_id: String,

    /// 1-based index into the course's chapters
    pub chapter_id: u32,

    pub notes: String,
}
