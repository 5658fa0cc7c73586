//! Naming policy for the exported Drive tree.
//!
//! Dates are always the UTC calendar day of the message timestamp so that
//! repeated runs chunk messages identically regardless of the local
//! timezone.

use chrono::{DateTime, Utc};

use crate::ts_seconds;

/// Default name for the root export folder.
pub const DEFAULT_ROOT_FOLDER: &str = "Slack Exports";

/// Name of the per-conversation subfolder that holds thread folders.
pub const THREADS_FOLDER: &str = "Threads";

const TOPIC_PREVIEW_LEN: usize = 40;
const MAX_NAME_LEN: usize = 100;

/// Folder name for a conversation: `<Kind> - <name>`.
pub fn conversation_folder_name(kind: &str, name: &str) -> String {
    let prefix = match kind {
        "dm" => "DM",
        "mpim" => "Group",
        "channel" => "Channel",
        "private_channel" => "Private",
        _ => "Chat",
    };
    format!("{} - {}", prefix, sanitize_name(name))
}

/// Folder name for a thread: `<yyyy-mm-dd> - <topic preview>`.
///
/// The preview is the parent message body, whitespace-collapsed and cut to
/// 40 characters with a trailing ellipsis. An empty body falls back to
/// "Thread".
pub fn thread_folder_name(parent_ts: &str, topic: &str) -> String {
    let mut preview = truncate_preview(topic, TOPIC_PREVIEW_LEN);
    if preview.is_empty() {
        preview = "Thread".to_string();
    }
    format!("{} - {}", ts_to_date(parent_ts), sanitize_name(&preview))
}

/// Title of a daily document, for conversations and threads alike.
pub fn daily_doc_title(date: &str) -> String {
    date.to_string()
}

/// The UTC calendar day of a Slack timestamp, as `yyyy-mm-dd`.
pub fn ts_to_date(ts: &str) -> String {
    let secs = ts_seconds(ts);
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "1970-01-01".to_string(),
    }
}

/// Replace characters Drive names should not carry.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | ':' | '|' => out.push('-'),
            '*' | '?' => {}
            '"' => out.push('\''),
            '<' => out.push('('),
            '>' => out.push(')'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    let trimmed = out.trim();
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

/// Collapse whitespace and cut to `max_chars`, appending `…` when cut.
pub fn truncate_preview(s: &str, max_chars: usize) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
