//! Export orchestrator.
//!
//! Per conversation: fetch history in pages, split thread replies out,
//! group main messages by UTC day, provision and write daily documents,
//! then export each thread into its own daily-chunked folder. The index is
//! persisted after every written document, which bounds what a crash can
//! lose to a single day of one conversation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConversationConfig;
use crate::error::{AppError, Result};
use crate::gdrive::{DocImage, DocLink, DriveApi, FolderInfo, MessageBlock};
use crate::index::{ConversationEntry, ConversationStatus, DocRef, ExportIndex, ThreadEntry, UserCacheEntry};
use crate::layout;
use crate::mrkdwn;
use crate::resolver::{sender_display_name, ChannelResolver, PersonResolver, UserResolver};
use crate::slack::{Message, SlackApi, SlackFile};
use crate::{ts_cmp, ts_newer, ts_seconds, ProgressCallback};

/// Hard cap on concurrent conversation exports.
pub const MAX_PARALLEL: usize = 5;

const THREAD_LINK_TEXT: &str = "→ View Thread";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub root_folder_name: String,
    /// When set, export into this existing folder instead of creating one
    /// by name.
    pub root_folder_id: String,
    /// Slack ts lower bound, empty = unbounded. Exclusive with sync_mode.
    pub date_from: String,
    /// Slack ts upper bound, empty = unbounded.
    pub date_to: String,
    /// Resume each conversation from its recorded last_message_ts.
    pub sync_mode: bool,
    /// Skip conversations already marked complete.
    pub resume: bool,
    pub parallel: usize,
}

/// Outcome of exporting one conversation.
#[derive(Debug)]
pub struct ExportResult {
    pub conversation_id: String,
    pub name: String,
    pub folder_url: String,
    pub message_count: usize,
    pub docs_created: usize,
    pub threads_exported: usize,
    pub duration: Duration,
    pub skipped: bool,
    pub error: Option<AppError>,
}

impl ExportResult {
    fn new(conv: &ConversationConfig) -> Self {
        Self {
            conversation_id: conv.id.clone(),
            name: conv.name.clone(),
            folder_url: String::new(),
            message_count: 0,
            docs_created: 0,
            threads_exported: 0,
            duration: Duration::ZERO,
            skipped: false,
            error: None,
        }
    }
}

impl std::fmt::Display for ExportResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match &self.error {
            Some(e) => format!("ERROR: {}", e),
            None if self.skipped => "SKIPPED".to_string(),
            None => "OK".to_string(),
        };
        write!(
            f,
            "{}: {} messages, {} docs, {} threads ({:.1?}) - {}",
            self.name,
            self.message_count,
            self.docs_created,
            self.threads_exported,
            self.duration,
            status
        )
    }
}

pub struct Exporter {
    slack: Arc<dyn SlackApi>,
    drive: Arc<dyn DriveApi>,
    index: Arc<ExportIndex>,
    users: Arc<UserResolver>,
    channels: Arc<ChannelResolver>,
    people: Arc<PersonResolver>,
    opts: ExportOptions,
    on_progress: ProgressCallback,
    cancel: CancellationToken,
}

impl Exporter {
    pub fn new(
        slack: Arc<dyn SlackApi>,
        drive: Arc<dyn DriveApi>,
        index: Arc<ExportIndex>,
        people: PersonResolver,
        opts: ExportOptions,
    ) -> Self {
        let mut opts = opts;
        if opts.root_folder_name.is_empty() {
            opts.root_folder_name = layout::DEFAULT_ROOT_FOLDER.to_string();
        }
        if opts.parallel == 0 {
            opts.parallel = 1;
        }
        Self {
            slack,
            drive,
            index,
            users: Arc::new(UserResolver::new()),
            channels: Arc::new(ChannelResolver::new()),
            people: Arc::new(people),
            opts,
            on_progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = on_progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Channel names known up front (from config) so `<#C…>` references
    /// resolve without extra lookups.
    pub fn channel_resolver(&self) -> &ChannelResolver {
        &self.channels
    }

    pub fn index(&self) -> &ExportIndex {
        &self.index
    }

    fn progress(&self, msg: &str) {
        info!("{}", msg);
        if let Some(cb) = &self.on_progress {
            cb(msg);
        }
    }

    /// Export every conversation in the list, up to `parallel` at a time.
    /// Individual failures are captured per conversation; the run only
    /// fails as a whole on cancellation, a fatal local error, or when
    /// nothing succeeded.
    pub async fn export_all(
        self: Arc<Self>,
        conversations: Vec<ConversationConfig>,
    ) -> Result<Vec<ExportResult>> {
        for conv in &conversations {
            self.channels.add(&conv.id, &conv.name);
        }

        let channel_ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
        self.progress(&format!(
            "Loading users from {} conversations...",
            channel_ids.len()
        ));
        self.users
            .preload_conversations(self.slack.as_ref(), &channel_ids, &self.on_progress)
            .await?;
        self.progress(&format!("Loaded {} users", self.users.count()));
        for user in self.users.all() {
            self.index.set_user(UserCacheEntry {
                id: user.id.clone(),
                name: user.name.clone(),
                display_name: user.display_name().to_string(),
                is_bot: user.is_bot,
                deleted: user.deleted,
            });
        }

        let total = conversations.len();
        let semaphore = Arc::new(Semaphore::new(self.opts.parallel.clamp(1, MAX_PARALLEL)));
        let mut handles = Vec::with_capacity(total);
        for (i, conv) in conversations.into_iter().enumerate() {
            let exporter = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("export semaphore closed");
                exporter.progress(&format!(
                    "Exporting conversation {}/{}: {}",
                    i + 1,
                    total,
                    conv.name
                ));
                exporter.export_conversation(&conv).await
            }));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    return Err(AppError::SlackApi(format!("export worker panicked: {}", e)))
                }
            }
        }

        self.index.save()?;

        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if let Some(fatal) = results
            .iter_mut()
            .find(|r| r.error.as_ref().map(|e| e.is_fatal()).unwrap_or(false))
        {
            if let Some(e) = fatal.error.take() {
                return Err(e);
            }
        }
        let succeeded = results.iter().filter(|r| r.error.is_none()).count();
        if succeeded == 0 && !results.is_empty() {
            return Err(AppError::ExportFailed(results.len()));
        }
        Ok(results)
    }

    /// Export a single conversation, capturing any error into the result.
    pub async fn export_conversation(&self, conv: &ConversationConfig) -> ExportResult {
        let started = Instant::now();
        let mut result = ExportResult::new(conv);

        if self.opts.resume && self.index.is_complete(&conv.id) {
            self.progress(&format!("{} already complete, skipping", conv.name));
            result.skipped = true;
            result.duration = started.elapsed();
            return result;
        }

        if let Err(e) = self.export_conversation_inner(conv, &mut result).await {
            warn!(conversation = %conv.id, error = %e, "conversation export failed");
            result.error = Some(e);
        }
        result.duration = started.elapsed();
        result
    }

    async fn export_conversation_inner(
        &self,
        conv: &ConversationConfig,
        result: &mut ExportResult,
    ) -> Result<()> {
        self.progress(&format!("Exporting conversation: {} ({})", conv.name, conv.id));

        let entry = self.ensure_conversation_folder(conv).await?;
        result.folder_url = entry.folder_url.clone();
        self.index
            .set_status(&conv.id, ConversationStatus::InProgress);
        self.index.save()?;

        let (oldest, latest) = self.fetch_bounds(&conv.id);

        self.progress("Fetching messages...");
        let mut all: Vec<Message> = Vec::new();
        {
            let cb = self.on_progress.clone();
            let mut fetched = 0usize;
            let mut sink = |batch: Vec<Message>| {
                fetched += batch.len();
                if let Some(cb) = &cb {
                    cb(&format!("Fetched {} messages...", fetched));
                }
                all.extend(batch);
            };
            self.slack
                .history(&conv.id, oldest.as_deref(), latest.as_deref(), &mut sink)
                .await?;
        }

        if all.is_empty() {
            self.progress("No new messages to export");
            self.index.set_status(&conv.id, ConversationStatus::Complete);
            self.index.save()?;
            return Ok(());
        }

        // Server order is newest first; documents want ascending ts. A
        // thread parent can arrive twice (history + replies listing), so
        // dedupe by ts.
        all.sort_by(|a, b| ts_cmp(&a.ts, &b.ts));
        let mut seen = HashSet::new();
        all.retain(|m| seen.insert(m.ts.clone()));

        let main: Vec<Message> = all.iter().filter(|m| m.is_main()).cloned().collect();
        self.progress(&format!(
            "Found {} main messages, {} thread replies",
            main.len(),
            all.len() - main.len()
        ));

        let by_date = group_by_date(&main);
        self.progress(&format!("Writing to {} daily docs...", by_date.len()));

        for (date, msgs) in &by_date {
            if self.cancel.is_cancelled() {
                self.index.save()?;
                return Err(AppError::Cancelled);
            }
            self.write_day(conv, &entry, date, msgs, result).await?;
        }

        let parents: Vec<&Message> = main.iter().filter(|m| m.reply_count > 0).collect();
        if !parents.is_empty() {
            self.progress(&format!("Exporting {} threads...", parents.len()));
            for parent in parents {
                match self.export_thread(&conv.id, &entry.folder_id, parent, result).await {
                    Ok(()) => result.threads_exported += 1,
                    Err(AppError::Cancelled) => {
                        self.index.save()?;
                        return Err(AppError::Cancelled);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(thread = %parent.ts, error = %e, "thread export failed, continuing");
                    }
                }
            }
        }

        let last_ts = all.last().map(|m| m.ts.clone()).unwrap_or_default();
        self.index.record_run(&conv.id, &last_ts, result.message_count);
        self.index.set_status(&conv.id, ConversationStatus::Complete);
        self.index.save()?;

        if conv.share {
            self.share_conversation_folder(conv, &entry.folder_id).await;
        }

        self.progress(&format!("Completed export of {}", conv.name));
        Ok(())
    }

    /// Best-effort read sharing of the conversation folder with its
    /// configured members. Opt-outs and unmapped members are skipped.
    async fn share_conversation_folder(&self, conv: &ConversationConfig, folder_id: &str) {
        for member in &conv.share_members {
            let Some(email) = self.people.sharing_email(member) else {
                continue;
            };
            let notify = self.people.notifications_enabled(member);
            match self.drive.share_with_user(folder_id, &email, notify).await {
                Ok(()) => self.progress(&format!("Shared {} with {}", conv.name, email)),
                Err(e) => {
                    warn!(member = %member, error = %e, "sharing failed");
                }
            }
        }
    }

    /// Fetch range: sync mode picks up at the recorded last_message_ts,
    /// otherwise the caller's explicit bounds apply.
    fn fetch_bounds(&self, conv_id: &str) -> (Option<String>, Option<String>) {
        if self.opts.sync_mode {
            let last = self
                .index
                .conversation(conv_id)
                .map(|c| c.last_message_ts)
                .unwrap_or_default();
            if last.is_empty() {
                (None, None)
            } else {
                (Some(last), None)
            }
        } else {
            let oldest = (!self.opts.date_from.is_empty()).then(|| self.opts.date_from.clone());
            let latest = (!self.opts.date_to.is_empty()).then(|| self.opts.date_to.clone());
            (oldest, latest)
        }
    }

    /// Write one day's main messages. Thread folders for this day's parents
    /// are provisioned first so the in-message thread link always points at
    /// a folder whose creation is already persisted.
    async fn write_day(
        &self,
        conv: &ConversationConfig,
        entry: &ConversationEntry,
        date: &str,
        msgs: &[Message],
        result: &mut ExportResult,
    ) -> Result<()> {
        let mut provisioned_thread_folders = false;
        for parent in msgs.iter().filter(|m| m.reply_count > 0) {
            self.ensure_thread_folder(&conv.id, parent).await?;
            provisioned_thread_folders = true;
        }
        if provisioned_thread_folders {
            self.index.save()?;
        }

        let baseline = self
            .index
            .daily_doc(&conv.id, date)
            .map(|d| d.last_message_ts)
            .unwrap_or_default();
        let fresh: Vec<&Message> = msgs.iter().filter(|m| ts_newer(&m.ts, &baseline)).collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let doc = self.ensure_daily_doc(&conv.id, &entry.folder_id, date).await?;

        let mut blocks = Vec::with_capacity(fresh.len());
        for msg in &fresh {
            blocks.push(self.message_to_block(&conv.id, &entry.folder_id, msg).await);
        }
        self.drive.batch_append(&doc.doc_id, &blocks).await?;

        if let Some(last) = fresh.last() {
            self.index
                .record_doc_write(&conv.id, date, &last.ts, fresh.len());
        }
        self.index.save()?;

        result.docs_created += 1;
        result.message_count += fresh.len();
        self.progress(&format!("Wrote {} messages to {}", fresh.len(), date));
        Ok(())
    }

    async fn export_thread(
        &self,
        conv_id: &str,
        conv_folder_id: &str,
        parent: &Message,
        result: &mut ExportResult,
    ) -> Result<()> {
        let thread = self.ensure_thread_folder(conv_id, parent).await?;

        let mut replies: Vec<Message> = Vec::new();
        {
            let mut sink = |batch: Vec<Message>| replies.extend(batch);
            self.slack.replies(conv_id, &parent.ts, &mut sink).await?;
        }
        // The parent appears as the first element of its own listing.
        replies.retain(|m| m.ts != parent.ts);
        if replies.is_empty() {
            return Ok(());
        }

        replies.sort_by(|a, b| ts_cmp(&a.ts, &b.ts));
        let mut seen = HashSet::new();
        replies.retain(|m| seen.insert(m.ts.clone()));

        let by_date = group_by_date(&replies);
        for (date, msgs) in &by_date {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let baseline = self
                .index
                .thread_daily_doc(conv_id, &parent.ts, date)
                .map(|d| d.last_message_ts)
                .unwrap_or_default();
            let fresh: Vec<&Message> =
                msgs.iter().filter(|m| ts_newer(&m.ts, &baseline)).collect();
            if fresh.is_empty() {
                continue;
            }

            let doc = self
                .ensure_thread_daily_doc(conv_id, &thread, date)
                .await?;
            let mut blocks = Vec::with_capacity(fresh.len());
            for msg in &fresh {
                blocks.push(self.message_to_block(conv_id, conv_folder_id, msg).await);
            }
            self.drive.batch_append(&doc.doc_id, &blocks).await?;

            if let Some(last) = fresh.last() {
                self.index
                    .record_thread_doc_write(conv_id, &parent.ts, date, &last.ts, fresh.len());
            }
            self.index.save()?;
            result.message_count += fresh.len();
        }

        if let Some(last) = replies.last() {
            self.index
                .record_thread_replies(conv_id, &parent.ts, replies.len(), &last.ts);
        }
        self.index.save()?;
        Ok(())
    }

    async fn ensure_root_folder(&self) -> Result<FolderInfo> {
        let (id, url) = self.index.root_folder();
        if !id.is_empty() {
            return Ok(FolderInfo {
                id,
                name: self.opts.root_folder_name.clone(),
                url,
            });
        }

        let folder = if !self.opts.root_folder_id.is_empty() {
            self.drive.get_folder(&self.opts.root_folder_id).await?
        } else {
            self.drive
                .find_or_create_folder(&self.opts.root_folder_name, "")
                .await?
        };
        self.index.set_root_folder(&folder.id, &folder.url);
        Ok(folder)
    }

    async fn ensure_conversation_folder(
        &self,
        conv: &ConversationConfig,
    ) -> Result<ConversationEntry> {
        let mut entry =
            self.index
                .get_or_create_conversation(&conv.id, &conv.name, conv.kind.as_str());
        if !entry.folder_id.is_empty() {
            return Ok(entry);
        }

        let root = self.ensure_root_folder().await?;
        let name = layout::conversation_folder_name(conv.kind.as_str(), &conv.name);
        let folder = self.drive.find_or_create_folder(&name, &root.id).await?;
        self.index
            .set_conversation_folder(&conv.id, &folder.id, &folder.url);
        entry.folder_id = folder.id;
        entry.folder_url = folder.url;
        Ok(entry)
    }

    async fn ensure_threads_folder(&self, conv_id: &str) -> Result<String> {
        let entry = self
            .index
            .conversation(conv_id)
            .ok_or_else(|| AppError::NotFound {
                resource: "conversation",
                id: conv_id.to_string(),
            })?;
        if !entry.threads_folder_id.is_empty() {
            return Ok(entry.threads_folder_id);
        }

        let folder = self
            .drive
            .find_or_create_folder(layout::THREADS_FOLDER, &entry.folder_id)
            .await?;
        self.index.set_threads_folder(conv_id, &folder.id);
        Ok(folder.id)
    }

    async fn ensure_thread_folder(
        &self,
        conv_id: &str,
        parent: &Message,
    ) -> Result<ThreadEntry> {
        if let Some(thread) = self.index.thread(conv_id, &parent.ts) {
            if !thread.folder_id.is_empty() {
                return Ok(thread);
            }
        }

        let threads_folder_id = self.ensure_threads_folder(conv_id).await?;
        let name = layout::thread_folder_name(&parent.ts, &parent.text);
        let folder = self
            .drive
            .find_or_create_folder(&name, &threads_folder_id)
            .await?;
        let thread = ThreadEntry {
            thread_ts: parent.ts.clone(),
            folder_id: folder.id,
            folder_url: folder.url,
            folder_name: name,
            ..ThreadEntry::default()
        };
        self.index.set_thread(conv_id, thread.clone());
        Ok(thread)
    }

    async fn ensure_daily_doc(
        &self,
        conv_id: &str,
        folder_id: &str,
        date: &str,
    ) -> Result<DocRef> {
        if let Some(doc) = self.index.daily_doc(conv_id, date) {
            if !doc.doc_id.is_empty() {
                return Ok(doc);
            }
        }

        let title = layout::daily_doc_title(date);
        let gdoc = self.drive.find_or_create_document(&title, folder_id).await?;
        let doc = DocRef {
            doc_id: gdoc.id,
            doc_url: gdoc.url,
            title,
            date: Some(date.to_string()),
            ..DocRef::default()
        };
        self.index.set_daily_doc(conv_id, date, doc.clone());
        Ok(doc)
    }

    async fn ensure_thread_daily_doc(
        &self,
        conv_id: &str,
        thread: &ThreadEntry,
        date: &str,
    ) -> Result<DocRef> {
        if let Some(doc) = self.index.thread_daily_doc(conv_id, &thread.thread_ts, date) {
            if !doc.doc_id.is_empty() {
                return Ok(doc);
            }
        }

        let title = layout::daily_doc_title(date);
        let gdoc = self
            .drive
            .find_or_create_document(&title, &thread.folder_id)
            .await?;
        let doc = DocRef {
            doc_id: gdoc.id,
            doc_url: gdoc.url,
            title,
            date: Some(date.to_string()),
            ..DocRef::default()
        };
        self.index
            .set_thread_daily_doc(conv_id, &thread.thread_ts, date, doc.clone());
        Ok(doc)
    }

    /// Render one message into a document block: converted body, thread
    /// link, attachment and file references, reactions, embedded images.
    async fn message_to_block(
        &self,
        conv_id: &str,
        folder_id: &str,
        msg: &Message,
    ) -> MessageBlock {
        let sender_name = sender_display_name(msg, &self.people, &self.users);
        let timestamp = format_message_time(&msg.ts);

        let index = Arc::clone(&self.index);
        let archive_resolver = move |channel: &str, ts: &str| {
            let url = index.lookup_doc_url(channel, ts);
            if url.is_empty() {
                None
            } else {
                Some(url)
            }
        };
        let (mut content, mrkdwn_links) = mrkdwn::convert_with_links(
            &msg.text,
            &self.users,
            &self.channels,
            Some(&self.people),
            Some(&archive_resolver),
        );
        let mut links: Vec<DocLink> = mrkdwn_links
            .into_iter()
            .map(|l| DocLink {
                text: l.text,
                url: l.url,
            })
            .collect();

        if msg.reply_count > 0 {
            let url = self.index.lookup_thread_url(conv_id, &msg.ts);
            if !url.is_empty() {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(THREAD_LINK_TEXT);
                links.push(DocLink {
                    text: THREAD_LINK_TEXT.to_string(),
                    url,
                });
            }
        }

        for att in &msg.attachments {
            if !att.text.is_empty() {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str("> ");
                content.push_str(&att.text);
            }
            if !att.title.is_empty() && !att.title_link.is_empty() {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&format!("{} ({})", att.title, att.title_link));
                links.push(DocLink {
                    text: att.title.clone(),
                    url: att.title_link.clone(),
                });
            }
        }

        let mut images = Vec::new();
        for file in &msg.files {
            if file.mimetype.starts_with("image/") && !file.url_private_download.is_empty() {
                match self.embed_image(file, folder_id).await {
                    Ok(url) => {
                        images.push(DocImage { url });
                        continue;
                    }
                    Err(e) => {
                        warn!(file = %file.name, error = %e, "image embed failed, falling back to reference");
                    }
                }
            }
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("[File: {}]", file.name));
        }

        if !msg.reactions.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("Reactions: ");
            for (i, r) in msg.reactions.iter().enumerate() {
                if i > 0 {
                    content.push(' ');
                }
                content.push_str(&format!(":{}: ({})", r.name, r.count));
            }
        }

        MessageBlock {
            sender_name,
            timestamp,
            content,
            links,
            images,
        }
    }

    /// Upload an image file under the conversation folder, grant
    /// anyone-with-link read, and return the embeddable content link.
    async fn embed_image(&self, file: &SlackFile, folder_id: &str) -> Result<String> {
        let data = self.slack.download_file(&file.url_private_download).await?;
        let file_id = self
            .drive
            .upload_file(&file.name, &file.mimetype, data, folder_id)
            .await?;
        self.drive.make_public(&file_id).await?;
        self.drive.web_content_link(&file_id).await
    }
}

/// Group messages by their UTC calendar day, ascending.
fn group_by_date(messages: &[Message]) -> BTreeMap<String, Vec<Message>> {
    let mut groups: BTreeMap<String, Vec<Message>> = BTreeMap::new();
    for msg in messages {
        groups
            .entry(layout::ts_to_date(&msg.ts))
            .or_default()
            .push(msg.clone());
    }
    groups
}

/// Render the message header time, UTC for determinism across runs.
fn format_message_time(ts: &str) -> String {
    match chrono::DateTime::<chrono::Utc>::from_timestamp(ts_seconds(ts), 0) {
        Some(dt) => dt.format("%-I:%M %p").to_string(),
        None => String::new(),
    }
}
