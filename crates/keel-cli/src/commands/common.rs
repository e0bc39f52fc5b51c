use chrono::{DateTime, Utc};
use keel_core::models::{ConflictRecord, QueuedOperation};
use keel_core::{Note, Record, Task};
use serde::Serialize;

use crate::context::ClientContext;
use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: String,
    pub title: String,
    pub done: bool,
    pub due: Option<String>,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub preview: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub collection: &'static str,
    pub id: String,
    pub kind: String,
    pub timestamp: String,
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Find the record whose id equals `query`, or the single one it prefixes.
pub fn resolve_record<'a, R: Record>(
    records: &'a [R],
    query: &str,
    noun: &'static str,
) -> Result<&'a R, CliError> {
    let query = normalize_identifier(query)?;
    if let Some(record) = records.iter().find(|record| record.id() == query) {
        return Ok(record);
    }

    let matches: Vec<&R> = records
        .iter()
        .filter(|record| record.id().starts_with(&query))
        .collect();
    match matches.as_slice() {
        [] => Err(CliError::NotFound(noun, query)),
        [record] => Ok(*record),
        several => {
            let options = several
                .iter()
                .take(3)
                .map(|record| short_id(record.id()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn join_words(parts: &[String]) -> Result<String, CliError> {
    normalize_content(&parts.join(" ")).ok_or(CliError::EmptyContent)
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_task_lines(tasks: &[Task]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    let today = Utc::now().date_naive();
    tasks
        .iter()
        .map(|task| {
            let mark = if task.done { "[x]" } else { "[ ]" };
            let title = preview(&task.title, 40);
            let relative_time = format_relative_time(task.updated_at.timestamp_millis(), now_ms);
            let mut line = format!("{:<13}  {mark} {title:<40}  {relative_time}", short_id(&task.id));
            if let Some(due) = task.due {
                let overdue = if task.is_overdue(today) { " (overdue)" } else { "" };
                line.push_str(&format!("  due {due}{overdue}"));
            }
            line
        })
        .collect()
}

pub fn task_to_list_item(task: &Task) -> TaskListItem {
    let now_ms = Utc::now().timestamp_millis();
    TaskListItem {
        id: task.id.clone(),
        title: task.title.clone(),
        done: task.done,
        due: task.due.map(|due| due.to_string()),
        updated_at: task.updated_at.timestamp_millis(),
        relative_time: format_relative_time(task.updated_at.timestamp_millis(), now_ms),
    }
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let title = preview(&note.title_preview(80), 40);
            let relative_time = format_relative_time(note.updated_at.timestamp_millis(), now_ms);
            format!("{:<13}  {title:<40}  {relative_time}", short_id(&note.id))
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.clone(),
        preview: preview(&note.title_preview(120), 80),
        content: note.content.clone(),
        created_at: note.created_at.timestamp_millis(),
        updated_at: note.updated_at.timestamp_millis(),
        relative_time: format_relative_time(note.updated_at.timestamp_millis(), now_ms),
    }
}

pub fn conflict_to_item(collection: &'static str, conflict: &ConflictRecord) -> ConflictItem {
    ConflictItem {
        collection,
        id: conflict.id.clone(),
        kind: serde_json::to_value(&conflict.kind)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default(),
        timestamp: format_timestamp(conflict.timestamp),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictItem]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<6}  {}/{}",
                conflict.timestamp,
                conflict.kind,
                conflict.collection,
                short_id(&conflict.id)
            )
        })
        .collect()
}

pub fn format_operation_lines(operations: &[QueuedOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            format!(
                "{:<13}  {:<40}  retries {}/{}  queued {}",
                short_id(&operation.id),
                operation.describe(),
                operation.retries,
                operation.max_retries,
                format_timestamp(operation.timestamp)
            )
        })
        .collect()
}

/// Replay pending writes and tell the user what is still queued.
pub async fn report_pending(ctx: &ClientContext) {
    let pending = ctx.flush_queue().await;
    if pending > 0 {
        println!("{pending} change(s) queued until the server is reachable");
    }
}
