//! Durable export index: maps Slack entities to the Drive artefacts they
//! were exported into, and records per-document progress for resume.
//!
//! All mutation goes through guarded accessors; reads hand out clones. The
//! file is written via temp-file-and-rename so an interrupted save never
//! leaves a truncated index behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::layout::ts_to_date;
use crate::ts_newer;

pub const METADATA_DIR: &str = "_metadata";
pub const INDEX_FILE: &str = "export-index.json";

/// `<config-dir>/_metadata/export-index.json`
pub fn default_index_path(config_dir: &Path) -> PathBuf {
    config_dir.join(METADATA_DIR).join(INDEX_FILE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocRef {
    pub doc_id: String,
    pub doc_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_message_ts: String,
    #[serde(default)]
    pub message_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub thread_ts: String,
    pub folder_id: String,
    pub folder_url: String,
    pub folder_name: String,
    #[serde(default)]
    pub daily_docs: BTreeMap<String, DocRef>,
    #[serde(default)]
    pub reply_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_reply_ts: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub folder_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub threads_folder_id: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub daily_docs: BTreeMap<String, DocRef>,
    #[serde(default)]
    pub threads: BTreeMap<String, ThreadEntry>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_message_ts: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserCacheEntry {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexData {
    #[serde(default)]
    root_folder_id: String,
    #[serde(default)]
    root_folder_url: String,
    #[serde(default)]
    conversations: BTreeMap<String, ConversationEntry>,
    #[serde(default)]
    users: BTreeMap<String, UserCacheEntry>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

impl Default for IndexData {
    fn default() -> Self {
        Self {
            root_folder_id: String::new(),
            root_folder_url: String::new(),
            conversations: BTreeMap::new(),
            users: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

pub struct ExportIndex {
    path: PathBuf,
    data: RwLock<IndexData>,
}

impl ExportIndex {
    /// Load an index from disk, or start a fresh one when the file does not
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| AppError::JsonParse(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexData::default(),
            Err(e) => {
                return Err(AppError::ReadFile {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
        })
    }

    /// Serialise under the write lock and swap into place atomically.
    pub fn save(&self) -> Result<()> {
        let mut data = self.data.write().expect("index lock poisoned");
        data.updated_at = Utc::now();
        let json = serde_json::to_vec_pretty(&*data)
            .map_err(|e| AppError::JsonSerialize(e.to_string()))?;
        drop(data);

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| AppError::WriteFile {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).map_err(|e| AppError::WriteFile {
            path: tmp.display().to_string(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| AppError::WriteFile {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    pub fn set_root_folder(&self, id: &str, url: &str) {
        let mut data = self.data.write().expect("index lock poisoned");
        data.root_folder_id = id.to_string();
        data.root_folder_url = url.to_string();
    }

    /// (id, url) of the root folder; both empty before the first export.
    pub fn root_folder(&self) -> (String, String) {
        let data = self.data.read().expect("index lock poisoned");
        (data.root_folder_id.clone(), data.root_folder_url.clone())
    }

    pub fn conversation(&self, id: &str) -> Option<ConversationEntry> {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations.get(id).cloned()
    }

    pub fn get_or_create_conversation(
        &self,
        id: &str,
        name: &str,
        kind: &str,
    ) -> ConversationEntry {
        let mut data = self.data.write().expect("index lock poisoned");
        data.conversations
            .entry(id.to_string())
            .or_insert_with(|| ConversationEntry {
                id: id.to_string(),
                name: name.to_string(),
                kind: kind.to_string(),
                folder_id: String::new(),
                folder_url: String::new(),
                threads_folder_id: String::new(),
                status: ConversationStatus::InProgress,
                daily_docs: BTreeMap::new(),
                threads: BTreeMap::new(),
                last_message_ts: String::new(),
                message_count: 0,
                last_updated: Utc::now(),
            })
            .clone()
    }

    pub fn set_conversation_folder(&self, id: &str, folder_id: &str, folder_url: &str) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(conv) = data.conversations.get_mut(id) {
            conv.folder_id = folder_id.to_string();
            conv.folder_url = folder_url.to_string();
        }
    }

    pub fn set_threads_folder(&self, id: &str, folder_id: &str) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(conv) = data.conversations.get_mut(id) {
            conv.threads_folder_id = folder_id.to_string();
        }
    }

    pub fn set_status(&self, id: &str, status: ConversationStatus) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(conv) = data.conversations.get_mut(id) {
            conv.status = status;
        }
    }

    pub fn is_complete(&self, id: &str) -> bool {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations
            .get(id)
            .map(|c| c.status == ConversationStatus::Complete)
            .unwrap_or(false)
    }

    /// Record the outcome of a run over a conversation. `last_message_ts`
    /// only moves forward.
    pub fn record_run(&self, id: &str, last_ts: &str, added: usize) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(conv) = data.conversations.get_mut(id) {
            if ts_newer(last_ts, &conv.last_message_ts) {
                conv.last_message_ts = last_ts.to_string();
            }
            conv.message_count += added;
            conv.last_updated = Utc::now();
        }
    }

    pub fn daily_doc(&self, conv_id: &str, date: &str) -> Option<DocRef> {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations
            .get(conv_id)
            .and_then(|c| c.daily_docs.get(date))
            .cloned()
    }

    pub fn set_daily_doc(&self, conv_id: &str, date: &str, doc: DocRef) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(conv) = data.conversations.get_mut(conv_id) {
            conv.daily_docs.insert(date.to_string(), doc);
        }
    }

    /// Record a batch write to a daily doc; the DocRef's `last_message_ts`
    /// only moves forward.
    pub fn record_doc_write(&self, conv_id: &str, date: &str, last_ts: &str, added: usize) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(doc) = data
            .conversations
            .get_mut(conv_id)
            .and_then(|c| c.daily_docs.get_mut(date))
        {
            if ts_newer(last_ts, &doc.last_message_ts) {
                doc.last_message_ts = last_ts.to_string();
            }
            doc.message_count += added;
        }
    }

    pub fn thread(&self, conv_id: &str, thread_ts: &str) -> Option<ThreadEntry> {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations
            .get(conv_id)
            .and_then(|c| c.threads.get(thread_ts))
            .cloned()
    }

    pub fn set_thread(&self, conv_id: &str, thread: ThreadEntry) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(conv) = data.conversations.get_mut(conv_id) {
            conv.threads.insert(thread.thread_ts.clone(), thread);
        }
    }

    pub fn thread_daily_doc(&self, conv_id: &str, thread_ts: &str, date: &str) -> Option<DocRef> {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations
            .get(conv_id)
            .and_then(|c| c.threads.get(thread_ts))
            .and_then(|t| t.daily_docs.get(date))
            .cloned()
    }

    pub fn set_thread_daily_doc(&self, conv_id: &str, thread_ts: &str, date: &str, doc: DocRef) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(thread) = data
            .conversations
            .get_mut(conv_id)
            .and_then(|c| c.threads.get_mut(thread_ts))
        {
            thread.daily_docs.insert(date.to_string(), doc);
        }
    }

    pub fn record_thread_doc_write(
        &self,
        conv_id: &str,
        thread_ts: &str,
        date: &str,
        last_ts: &str,
        added: usize,
    ) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(doc) = data
            .conversations
            .get_mut(conv_id)
            .and_then(|c| c.threads.get_mut(thread_ts))
            .and_then(|t| t.daily_docs.get_mut(date))
        {
            if ts_newer(last_ts, &doc.last_message_ts) {
                doc.last_message_ts = last_ts.to_string();
            }
            doc.message_count += added;
        }
    }

    pub fn record_thread_replies(
        &self,
        conv_id: &str,
        thread_ts: &str,
        reply_count: usize,
        last_reply_ts: &str,
    ) {
        let mut data = self.data.write().expect("index lock poisoned");
        if let Some(thread) = data
            .conversations
            .get_mut(conv_id)
            .and_then(|c| c.threads.get_mut(thread_ts))
        {
            thread.reply_count = reply_count;
            if ts_newer(last_reply_ts, &thread.last_reply_ts) {
                thread.last_reply_ts = last_reply_ts.to_string();
            }
        }
    }

    pub fn user(&self, id: &str) -> Option<UserCacheEntry> {
        let data = self.data.read().expect("index lock poisoned");
        data.users.get(id).cloned()
    }

    pub fn set_user(&self, user: UserCacheEntry) {
        let mut data = self.data.write().expect("index lock poisoned");
        data.users.insert(user.id.clone(), user);
    }

    /// Daily-doc URL for a message: its UTC day's doc, falling back to the
    /// conversation folder, falling back to empty.
    pub fn lookup_doc_url(&self, conv_id: &str, message_ts: &str) -> String {
        let data = self.data.read().expect("index lock poisoned");
        let Some(conv) = data.conversations.get(conv_id) else {
            return String::new();
        };
        let date = ts_to_date(message_ts);
        match conv.daily_docs.get(&date) {
            Some(doc) => doc.doc_url.clone(),
            None => conv.folder_url.clone(),
        }
    }

    pub fn lookup_thread_url(&self, conv_id: &str, thread_ts: &str) -> String {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations
            .get(conv_id)
            .and_then(|c| c.threads.get(thread_ts))
            .map(|t| t.folder_url.clone())
            .unwrap_or_default()
    }

    pub fn lookup_conversation_url(&self, conv_id: &str) -> String {
        let data = self.data.read().expect("index lock poisoned");
        data.conversations
            .get(conv_id)
            .map(|c| c.folder_url.clone())
            .unwrap_or_default()
    }

    /// All conversation entries, sorted by name, for status reporting.
    pub fn summaries(&self) -> Vec<ConversationEntry> {
        let data = self.data.read().expect("index lock poisoned");
        let mut entries: Vec<_> = data.conversations.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}
