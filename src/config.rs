//! Configuration files read from the config directory:
//! `conversations.json` (what to export), `people.json` (Slack → Google
//! identity mapping) and `settings.json` (tokens and defaults).

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

static CONVERSATION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[CDGW][A-Z0-9]+$").expect("invalid conversation id pattern"));
static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^U[A-Z0-9]+$").expect("invalid user id pattern"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("invalid email pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Dm,
    Mpim,
    Channel,
    PrivateChannel,
}

impl ConversationKind {
    /// The string used in index entries and folder-name prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Dm => "dm",
            ConversationKind::Mpim => "mpim",
            ConversationKind::Channel => "channel",
            ConversationKind::PrivateChannel => "private_channel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Long-lived bot token.
    Api,
    /// Session token + cookie harvested from a logged-in browser.
    Browser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub mode: ExportMode,
    #[serde(default = "default_true")]
    pub export: bool,
    #[serde(default)]
    pub share: bool,
    #[serde(default, rename = "shareMembers", skip_serializing_if = "Vec::is_empty")]
    pub share_members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationsConfig {
    #[serde(default)]
    pub conversations: Vec<ConversationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonConfig {
    #[serde(rename = "slackId")]
    pub slack_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, rename = "displayName", skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, rename = "googleEmail", skip_serializing_if = "String::is_empty")]
    pub google_email: String,
    #[serde(default, rename = "noNotifications")]
    pub no_notifications: bool,
    #[serde(default, rename = "noShare")]
    pub no_share: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeopleConfig {
    #[serde(default)]
    pub people: Vec<PersonConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, rename = "slackBotToken", skip_serializing_if = "String::is_empty")]
    pub slack_bot_token: String,
    #[serde(default, rename = "slackSessionToken", skip_serializing_if = "String::is_empty")]
    pub slack_session_token: String,
    #[serde(default, rename = "slackSessionCookie", skip_serializing_if = "String::is_empty")]
    pub slack_session_cookie: String,
    #[serde(default, rename = "googleAccessToken", skip_serializing_if = "String::is_empty")]
    pub google_access_token: String,
    #[serde(default, rename = "googleDriveFolderId", skip_serializing_if = "String::is_empty")]
    pub google_drive_folder_id: String,
    #[serde(default, rename = "logLevel", skip_serializing_if = "String::is_empty")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

impl ConversationsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        let cfg: ConversationsConfig =
            serde_json::from_str(&content).map_err(|e| AppError::JsonParse(e.to_string()))?;
        for (i, conv) in cfg.conversations.iter().enumerate() {
            validate_conversation(conv)
                .map_err(|e| AppError::InvalidConfig(format!("conversation #{}: {}", i, e)))?;
        }
        Ok(cfg)
    }

    /// Conversations flagged for export.
    pub fn exportable(&self) -> Vec<ConversationConfig> {
        self.conversations
            .iter()
            .filter(|c| c.export)
            .cloned()
            .collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ConversationConfig> {
        self.conversations.iter().find(|c| c.id == id)
    }
}

impl PeopleConfig {
    /// Load people.json; a missing file yields an empty mapping.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PeopleConfig::default())
            }
            Err(e) => {
                return Err(AppError::ReadFile {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        let cfg: PeopleConfig =
            serde_json::from_str(&content).map_err(|e| AppError::JsonParse(e.to_string()))?;
        for (i, person) in cfg.people.iter().enumerate() {
            validate_person(person)
                .map_err(|e| AppError::InvalidConfig(format!("person #{}: {}", i, e)))?;
        }
        Ok(cfg)
    }
}

impl Settings {
    /// Load settings.json; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => {
                return Err(AppError::ReadFile {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        serde_json::from_str(&content).map_err(|e| AppError::JsonParse(e.to_string()))
    }
}

fn validate_conversation(c: &ConversationConfig) -> std::result::Result<(), String> {
    if c.id.is_empty() {
        return Err("id is required".to_string());
    }
    if !CONVERSATION_ID_RE.is_match(&c.id) {
        return Err(format!("invalid conversation id format: {}", c.id));
    }
    if c.name.is_empty() {
        return Err("name is required".to_string());
    }
    Ok(())
}

fn validate_person(p: &PersonConfig) -> std::result::Result<(), String> {
    if p.slack_id.is_empty() {
        return Err("slackId is required".to_string());
    }
    if !USER_ID_RE.is_match(&p.slack_id) {
        return Err(format!("invalid slackId format: {}", p.slack_id));
    }
    if !p.email.is_empty() && !EMAIL_RE.is_match(&p.email) {
        return Err(format!("invalid email format: {}", p.email));
    }
    if !p.google_email.is_empty() && !EMAIL_RE.is_match(&p.google_email) {
        return Err(format!("invalid googleEmail format: {}", p.google_email));
    }
    Ok(())
}
