//! Flashcards, habits, inventory and time tracking.
//!
//! These collections sync exactly like tasks and notes. Time sessions are an
//! append-only log: they carry no `updatedAt` and are deduplicated by id.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::record::{new_record_id, Record, UPDATED_AT};

fn edit_tracked(
    field: &str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match field {
        UPDATED_AT => Some(updated_at),
        "createdAt" => Some(created_at),
        _ => None,
    }
}

/// Spaced-repetition card using Leitner boxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    /// Leitner box, starting at 0
    #[serde(default, rename = "box")]
    pub leitner_box: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_review: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flashcard {
    pub const MAX_BOX: u8 = 5;

    #[must_use]
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            front: front.into(),
            back: back.into(),
            leitner_box: 0,
            next_review: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the card up a box on success, back to box 0 on failure, and
    /// schedule the next review `2^box` days after `today`.
    pub fn review(&mut self, correct: bool, today: NaiveDate) {
        self.leitner_box = if correct {
            (self.leitner_box + 1).min(Self::MAX_BOX)
        } else {
            0
        };
        let days = 1_u64 << self.leitner_box;
        self.next_review = today.checked_add_days(chrono::Days::new(days));
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

impl Record for Flashcard {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        edit_tracked(field, self.created_at, self.updated_at)
    }
}

/// A recurring habit and the days it was completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub completions: Vec<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Habit {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            name: name.into(),
            completions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a completion for `day`. Returns false if it was already recorded.
    pub fn complete(&mut self, day: NaiveDate) -> bool {
        if self.completions.contains(&day) {
            return false;
        }
        self.completions.push(day);
        self.completions.sort_unstable();
        self.updated_at = Utc::now().max(self.updated_at);
        true
    }

    /// Consecutive completed days ending at `today` (or yesterday).
    #[must_use]
    pub fn streak(&self, today: NaiveDate) -> usize {
        let mut day = if self.completions.contains(&today) {
            today
        } else {
            match today.pred_opt() {
                Some(day) => day,
                None => return 0,
            }
        };
        let mut streak = 0;
        while self.completions.contains(&day) {
            streak += 1;
            match day.pred_opt() {
                Some(previous) => day = previous,
                None => break,
            }
        }
        streak
    }
}

impl Record for Habit {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        edit_tracked(field, self.created_at, self.updated_at)
    }
}

/// Household inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    #[must_use]
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            name: name.into(),
            quantity,
            location: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adjust the quantity by `delta`, saturating at zero.
    pub fn adjust(&mut self, delta: i64) {
        let next = i64::from(self.quantity).saturating_add(delta).max(0);
        self.quantity = u32::try_from(next).unwrap_or(u32::MAX);
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

impl Record for InventoryItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        edit_tracked(field, self.created_at, self.updated_at)
    }
}

/// A tracked block of time. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSession {
    pub id: String,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl TimeSession {
    #[must_use]
    pub fn new(label: impl Into<String>, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            id: new_record_id(),
            label: label.into(),
            started_at,
            ended_at,
        }
    }

    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        (self.ended_at - self.started_at).max(chrono::Duration::zero())
    }
}

impl Record for TimeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match field {
            "startedAt" => Some(self.started_at),
            "endedAt" => Some(self.ended_at),
            _ => None,
        }
    }
}
