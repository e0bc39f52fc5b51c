//! Note model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{new_record_id, Record, UPDATED_AT};

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier (UUID v7)
    pub id: String,
    /// Optional title; the first content line is shown when empty
    #[serde(default)]
    pub title: String,
    /// Plain text content
    #[serde(default)]
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Create a new note with the given content
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            title: String::new(),
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style title setter
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Replace the content and bump `updated_at`
    pub fn edit(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    /// Mark the note as modified now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Get the title, or the first content line truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.content.lines().next().unwrap_or("")
        } else {
            self.title.trim()
        };
        source.chars().take(max_len).collect()
    }

    /// Check if note content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty()
    }
}

impl Record for Note {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match field {
            UPDATED_AT => Some(self.updated_at),
            "createdAt" => Some(self.created_at),
            _ => None,
        }
    }
}
