//! Identity resolution: Slack user ids to display names and external
//! emails, channel ids to names.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::config::PeopleConfig;
use crate::error::Result;
use crate::slack::{Message, SlackApi, SlackUser};
use crate::ProgressCallback;

/// Maps Slack user ids to external emails and display names, loaded once
/// from the persisted people directory.
#[derive(Debug, Default)]
pub struct PersonResolver {
    emails: HashMap<String, String>,
    names: HashMap<String, String>,
    no_share: HashSet<String>,
    no_notifications: HashSet<String>,
}

impl PersonResolver {
    pub fn from_config(people: &PeopleConfig) -> Self {
        let mut resolver = Self::default();
        for p in &people.people {
            if !p.google_email.is_empty() {
                resolver
                    .emails
                    .insert(p.slack_id.clone(), p.google_email.clone());
            }
            if !p.display_name.is_empty() {
                resolver
                    .names
                    .insert(p.slack_id.clone(), p.display_name.clone());
            }
            if p.no_share {
                resolver.no_share.insert(p.slack_id.clone());
            }
            if p.no_notifications {
                resolver.no_notifications.insert(p.slack_id.clone());
            }
        }
        resolver
    }

    #[cfg(test)]
    pub fn with_entries(entries: &[(&str, &str, &str)]) -> Self {
        let mut resolver = Self::default();
        for (id, email, name) in entries {
            if !email.is_empty() {
                resolver.emails.insert(id.to_string(), email.to_string());
            }
            if !name.is_empty() {
                resolver.names.insert(id.to_string(), name.to_string());
            }
        }
        resolver
    }

    pub fn resolve_name(&self, user_id: &str) -> Option<String> {
        self.names.get(user_id).cloned()
    }

    pub fn resolve_email(&self, user_id: &str) -> Option<String> {
        self.emails.get(user_id).cloned()
    }

    pub fn email_count(&self) -> usize {
        self.emails.len()
    }

    /// Email to share exported folders with, unless the person opted out
    /// or has no mapped address.
    pub fn sharing_email(&self, user_id: &str) -> Option<String> {
        if self.no_share.contains(user_id) {
            return None;
        }
        self.emails.get(user_id).cloned()
    }

    pub fn notifications_enabled(&self, user_id: &str) -> bool {
        !self.no_notifications.contains(user_id)
    }
}

/// Lazily-filled cache of Slack user records.
#[derive(Debug, Default)]
pub struct UserResolver {
    users: RwLock<HashMap<String, SlackUser>>,
}

impl UserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user: SlackUser) {
        let mut users = self.users.write().expect("user resolver lock poisoned");
        users.insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &str) -> Option<SlackUser> {
        let users = self.users.read().expect("user resolver lock poisoned");
        users.get(id).cloned()
    }

    /// Display name for an id; the raw id when unknown. No guessing.
    pub fn resolve(&self, id: &str) -> String {
        let users = self.users.read().expect("user resolver lock poisoned");
        match users.get(id) {
            Some(user) => user.display_name().to_string(),
            None => id.to_string(),
        }
    }

    pub fn count(&self) -> usize {
        self.users.read().expect("user resolver lock poisoned").len()
    }

    pub fn all(&self) -> Vec<SlackUser> {
        let users = self.users.read().expect("user resolver lock poisoned");
        users.values().cloned().collect()
    }

    /// Prepopulate the cache from the member lists of the conversations
    /// being exported. Much cheaper than a workspace-wide users.list on
    /// large workspaces. Inaccessible member lists are skipped; those users
    /// resolve on the fly later.
    pub async fn preload_conversations(
        &self,
        client: &dyn SlackApi,
        channel_ids: &[String],
        progress: &ProgressCallback,
    ) -> Result<()> {
        let mut member_ids: HashSet<String> = HashSet::new();
        for channel_id in channel_ids {
            match client.conversation_members(channel_id).await {
                Ok(members) => {
                    member_ids.extend(members);
                }
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "could not list members");
                    continue;
                }
            }
            if let Some(cb) = progress {
                cb(&format!(
                    "Found {} unique members so far...",
                    member_ids.len()
                ));
            }
        }

        let mut fetched = 0usize;
        for member_id in member_ids {
            if self.get(&member_id).is_some() {
                continue;
            }
            match client.user_info(&member_id).await {
                Ok(user) => {
                    self.add(user);
                    fetched += 1;
                }
                Err(e) => {
                    debug!(user = %member_id, error = %e, "skipping unresolvable user");
                }
            }
            if fetched > 0 && fetched % 50 == 0 {
                if let Some(cb) = progress {
                    cb(&format!("Fetched {} user profiles...", fetched));
                }
            }
        }
        Ok(())
    }
}

/// Channel id → name map fed from config and conversations.list.
#[derive(Debug, Default)]
pub struct ChannelResolver {
    channels: RwLock<HashMap<String, String>>,
}

impl ChannelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, name: &str) {
        let mut channels = self.channels.write().expect("channel resolver lock poisoned");
        channels.insert(id.to_string(), name.to_string());
    }

    pub fn resolve(&self, id: &str) -> String {
        let channels = self.channels.read().expect("channel resolver lock poisoned");
        channels.get(id).cloned().unwrap_or_else(|| id.to_string())
    }
}

/// Display name for a message sender.
///
/// Resolution order: people directory → user cache → raw id. Bot and
/// deactivated users get a suffix so readers can tell them apart.
pub fn sender_display_name(
    msg: &Message,
    people: &PersonResolver,
    users: &UserResolver,
) -> String {
    if let Some(username) = &msg.username {
        if !username.is_empty() {
            return format!("{} [bot]", username);
        }
    }

    if !msg.user.is_empty() {
        let mut name = people
            .resolve_name(&msg.user)
            .unwrap_or_default();

        if name.is_empty() {
            let resolved = users.resolve(&msg.user);
            if resolved != msg.user {
                name = resolved;
            }
        }

        if name.is_empty() {
            name = msg.user.clone();
        }

        if let Some(user) = users.get(&msg.user) {
            if user.is_bot || user.is_app_user {
                name.push_str(" [bot]");
            } else if user.deleted {
                name.push_str(" [deactivated]");
            }
        }
        return name;
    }

    if msg.bot_id.is_some() {
        return "Bot".to_string();
    }

    "Unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonConfig;

    fn user(id: &str, display: &str) -> SlackUser {
        let mut u = SlackUser {
            id: id.to_string(),
            ..SlackUser::default()
        };
        u.profile.display_name = display.to_string();
        u
    }

    fn msg_from(user_id: &str) -> Message {
        Message {
            ts: "1.000000".to_string(),
            user: user_id.to_string(),
            ..Message::default()
        }
    }

    #[test]
    fn test_person_resolver_from_config() {
        let cfg = PeopleConfig {
            people: vec![PersonConfig {
                slack_id: "U1".to_string(),
                display_name: "Alice".to_string(),
                google_email: "alice@corp.example".to_string(),
                ..PersonConfig::default()
            }],
        };
        let resolver = PersonResolver::from_config(&cfg);
        assert_eq!(resolver.resolve_name("U1"), Some("Alice".to_string()));
        assert_eq!(
            resolver.resolve_email("U1"),
            Some("alice@corp.example".to_string())
        );
        assert_eq!(resolver.resolve_name("U2"), None);
        assert_eq!(resolver.email_count(), 1);
    }

    #[test]
    fn test_sharing_email_honours_opt_outs() {
        let cfg = PeopleConfig {
            people: vec![
                PersonConfig {
                    slack_id: "U1".to_string(),
                    google_email: "alice@corp.example".to_string(),
                    ..PersonConfig::default()
                },
                PersonConfig {
                    slack_id: "U2".to_string(),
                    google_email: "bob@corp.example".to_string(),
                    no_share: true,
                    ..PersonConfig::default()
                },
                PersonConfig {
                    slack_id: "U3".to_string(),
                    google_email: "carol@corp.example".to_string(),
                    no_notifications: true,
                    ..PersonConfig::default()
                },
            ],
        };
        let resolver = PersonResolver::from_config(&cfg);
        assert_eq!(
            resolver.sharing_email("U1"),
            Some("alice@corp.example".to_string())
        );
        assert_eq!(resolver.sharing_email("U2"), None);
        assert_eq!(resolver.sharing_email("U4"), None);
        assert!(resolver.notifications_enabled("U1"));
        assert!(!resolver.notifications_enabled("U3"));
    }

    #[test]
    fn test_user_resolver_resolve() {
        let resolver = UserResolver::new();
        resolver.add(user("U1", "Alice"));
        assert_eq!(resolver.resolve("U1"), "Alice");
        assert_eq!(resolver.resolve("U2"), "U2");
        assert_eq!(resolver.count(), 1);
    }

    #[test]
    fn test_channel_resolver() {
        let resolver = ChannelResolver::new();
        resolver.add("C1", "general");
        assert_eq!(resolver.resolve("C1"), "general");
        assert_eq!(resolver.resolve("C2"), "C2");
    }

    #[test]
    fn test_sender_name_prefers_people_directory() {
        let people = PersonResolver::with_entries(&[("U1", "", "Alice Directory")]);
        let users = UserResolver::new();
        users.add(user("U1", "Alice Cache"));
        assert_eq!(
            sender_display_name(&msg_from("U1"), &people, &users),
            "Alice Directory"
        );
    }

    #[test]
    fn test_sender_name_falls_back_to_cache_then_id() {
        let people = PersonResolver::default();
        let users = UserResolver::new();
        users.add(user("U1", "Alice"));
        assert_eq!(sender_display_name(&msg_from("U1"), &people, &users), "Alice");
        assert_eq!(sender_display_name(&msg_from("U9"), &people, &users), "U9");
    }

    #[test]
    fn test_sender_name_bot_suffix() {
        let people = PersonResolver::default();
        let users = UserResolver::new();
        let mut bot = user("U1", "deploybot");
        bot.is_bot = true;
        users.add(bot);
        assert_eq!(
            sender_display_name(&msg_from("U1"), &people, &users),
            "deploybot [bot]"
        );
    }

    #[test]
    fn test_sender_name_deactivated_suffix() {
        let people = PersonResolver::default();
        let users = UserResolver::new();
        let mut gone = user("U1", "Carol");
        gone.deleted = true;
        users.add(gone);
        assert_eq!(
            sender_display_name(&msg_from("U1"), &people, &users),
            "Carol [deactivated]"
        );
    }

    #[test]
    fn test_sender_name_username_message() {
        let people = PersonResolver::default();
        let users = UserResolver::new();
        let msg = Message {
            ts: "1.000000".to_string(),
            username: Some("webhookbot".to_string()),
            ..Message::default()
        };
        assert_eq!(
            sender_display_name(&msg, &people, &users),
            "webhookbot [bot]"
        );
    }

    #[test]
    fn test_sender_name_bot_id_only() {
        let people = PersonResolver::default();
        let users = UserResolver::new();
        let msg = Message {
            ts: "1.000000".to_string(),
            bot_id: Some("B123".to_string()),
            ..Message::default()
        };
        assert_eq!(sender_display_name(&msg, &people, &users), "Bot");
    }
}
