//! Bridges between the CLI surface and the export core: credential
//! resolution, client construction, summary printing, exit status.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::config::{ConversationConfig, ConversationsConfig, ExportMode, PeopleConfig, Settings};
use crate::error::{AppError, Result};
use crate::exporter::{ExportOptions, Exporter};
use crate::gdrive::{DriveApi, DriveClient, StaticTokenProvider};
use crate::index::{default_index_path, ConversationStatus, ExportIndex};
use crate::resolver::PersonResolver;
use crate::slack::{SlackApi, SlackClient};
use crate::{parse_date, ProgressCallback};

pub struct ExportArgs {
    pub ids: Vec<String>,
    pub folder: String,
    pub folder_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub sync: bool,
    pub resume: bool,
    pub parallel: usize,
    pub dry_run: bool,
}

pub async fn run_export(config_dir: &str, args: ExportArgs) -> Result<()> {
    if args.sync && (args.from.is_some() || args.to.is_some()) {
        return Err(AppError::InvalidConfig(
            "--sync cannot be combined with --from or --to".to_string(),
        ));
    }
    if args.resume && (args.from.is_some() || args.to.is_some()) {
        return Err(AppError::InvalidConfig(
            "--resume cannot be combined with --from or --to".to_string(),
        ));
    }

    let config_dir = Path::new(config_dir);
    let settings = Settings::load(&config_dir.join("settings.json"))?;
    let conversations = ConversationsConfig::load(&config_dir.join("conversations.json"))?;
    let people = PeopleConfig::load(&config_dir.join("people.json"))?;

    let to_export: Vec<ConversationConfig> = if args.ids.is_empty() {
        conversations.exportable()
    } else {
        args.ids
            .iter()
            .map(|id| {
                conversations.get_by_id(id).cloned().ok_or_else(|| {
                    AppError::InvalidConfig(format!("conversation not found in config: {}", id))
                })
            })
            .collect::<Result<_>>()?
    };

    if to_export.is_empty() {
        println!("No conversations to export.");
        println!();
        println!("Configure conversations in {} and set \"export\": true", config_dir.join("conversations.json").display());
        return Ok(());
    }

    println!("Found {} conversations to export", to_export.len());
    if !people.people.is_empty() {
        println!("People mapping: {} entries", people.people.len());
    }

    if args.dry_run {
        println!();
        println!("DRY RUN - Would export:");
        for c in &to_export {
            println!("  - {} ({})", c.name, c.id);
            println!("    Type: {}, Mode: {:?}", c.kind.as_str(), c.mode);
        }
        return Ok(());
    }

    let date_from = match &args.from {
        Some(s) => crate::date_to_slack_ts(parse_date(s)?),
        None => String::new(),
    };
    let date_to = match &args.to {
        Some(s) => end_of_day_ts(parse_date(s)?),
        None => String::new(),
    };

    let root_folder_id = if args.folder_id.is_empty() {
        settings.google_drive_folder_id.clone()
    } else {
        args.folder_id.clone()
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                eprintln!("Interrupt received, saving progress...");
                cancel.cancel();
            }
        });
    }

    let slack = build_slack_client(&settings, &to_export, cancel.clone())?;
    let drive = build_drive_client(&settings)?;
    let index = Arc::new(ExportIndex::load(&default_index_path(config_dir))?);

    let opts = ExportOptions {
        root_folder_name: args.folder.clone(),
        root_folder_id,
        date_from,
        date_to,
        sync_mode: args.sync,
        resume: args.resume,
        parallel: args.parallel,
    };
    let progress: ProgressCallback = Some(Arc::new(|msg: &str| println!("  {}", msg)));
    let exporter = Arc::new(
        Exporter::new(
            slack,
            drive,
            Arc::clone(&index),
            PersonResolver::from_config(&people),
            opts,
        )
        .with_progress(progress)
        .with_cancellation(cancel.clone()),
    );

    println!();
    println!("Starting export...");
    println!();
    let results = exporter.export_all(to_export).await?;

    println!();
    println!("Export Summary");
    println!("==============");
    let mut total_messages = 0;
    let mut total_docs = 0;
    let mut total_threads = 0;
    let mut failed = 0;
    for r in &results {
        println!("{}", r);
        total_messages += r.message_count;
        total_docs += r.docs_created;
        total_threads += r.threads_exported;
        if r.error.is_some() {
            failed += 1;
        }
    }
    println!();
    println!(
        "Total: {} messages, {} docs, {} threads",
        total_messages, total_docs, total_threads
    );

    let (_, root_url) = index.root_folder();
    if !root_url.is_empty() {
        println!();
        println!("Export folder:");
        println!("  {}", root_url);
    }

    if failed > 0 {
        return Err(AppError::ExportFailed(failed));
    }
    Ok(())
}

pub async fn run_discover(config_dir: &str) -> Result<()> {
    let settings = Settings::load(&Path::new(config_dir).join("settings.json"))?;
    let slack = build_slack_client_from_settings(&settings)?;

    println!("Discovering conversations...");
    let conversations = slack
        .list_conversations(&["im", "mpim", "public_channel", "private_channel"])
        .await?;

    println!();
    for conv in &conversations {
        let label = if conv.name.is_empty() {
            conv.user.as_str()
        } else {
            conv.name.as_str()
        };
        println!("{:<14} {:<16} {}", conv.id, conv.kind_str(), label);
    }
    println!();
    println!("{} conversations", conversations.len());
    Ok(())
}

pub async fn run_test(config_dir: &str) -> Result<()> {
    let config_dir = Path::new(config_dir);
    let settings = Settings::load(&config_dir.join("settings.json"))?;
    let slack = build_slack_client_from_settings(&settings)?;

    println!("Slack API Access Test");
    println!("=====================");
    println!();

    let auth = slack.auth_test().await?;
    println!("Team: {} ({})", auth.team, auth.team_id);
    println!("User: {} ({})", auth.user, auth.user_id);
    println!();

    match ConversationsConfig::load(&config_dir.join("conversations.json")) {
        Ok(cfg) => {
            for conv in &cfg.conversations {
                match slack.conversation_info(&conv.id).await {
                    Ok(info) => {
                        println!("  {:<14} ok ({})", conv.id, info.kind_str());
                    }
                    Err(e) => {
                        println!("  {:<14} ERROR: {}", conv.id, e);
                    }
                }
            }
        }
        Err(_) => {
            println!("No conversations.json found; token check only.");
        }
    }

    Ok(())
}

pub fn run_status(config_dir: &str) -> Result<()> {
    let index = ExportIndex::load(&default_index_path(Path::new(config_dir)))?;

    let entries = index.summaries();
    if entries.is_empty() {
        println!("No exports recorded yet.");
        return Ok(());
    }

    for entry in &entries {
        let status = match entry.status {
            ConversationStatus::Complete => "complete",
            ConversationStatus::InProgress => "in progress",
        };
        println!(
            "{:<30} {:>6} msgs  {:>3} docs  {:>3} threads  [{}]",
            truncate_name(&entry.name, 30),
            entry.message_count,
            entry.daily_docs.len(),
            entry.threads.len(),
            status
        );
    }

    let (_, root_url) = index.root_folder();
    if !root_url.is_empty() {
        println!();
        println!("Export folder:");
        println!("  {}", root_url);
    }
    Ok(())
}

fn build_slack_client(
    settings: &Settings,
    conversations: &[ConversationConfig],
    cancel: CancellationToken,
) -> Result<Arc<dyn SlackApi>> {
    let browser_mode = conversations.iter().any(|c| c.mode == ExportMode::Browser);
    if browser_mode {
        let token = non_empty_or_env(&settings.slack_session_token, "SLACK_TOKEN")
            .ok_or_else(|| AppError::MissingToken("slackSessionToken / SLACK_TOKEN".to_string()))?;
        let cookie = non_empty_or_env(&settings.slack_session_cookie, "SLACK_COOKIE")
            .ok_or_else(|| {
                AppError::MissingToken("slackSessionCookie / SLACK_COOKIE".to_string())
            })?;
        Ok(Arc::new(
            SlackClient::session(&token, &cookie)?.with_cancellation(cancel),
        ))
    } else {
        let token = non_empty_or_env(&settings.slack_bot_token, "SLACK_BOT_TOKEN")
            .ok_or_else(|| AppError::MissingToken("slackBotToken / SLACK_BOT_TOKEN".to_string()))?;
        Ok(Arc::new(
            SlackClient::bot(&token)?.with_cancellation(cancel),
        ))
    }
}

fn build_slack_client_from_settings(settings: &Settings) -> Result<Arc<dyn SlackApi>> {
    if let Some(token) = non_empty_or_env(&settings.slack_session_token, "SLACK_TOKEN") {
        if let Some(cookie) = non_empty_or_env(&settings.slack_session_cookie, "SLACK_COOKIE") {
            return Ok(Arc::new(SlackClient::session(&token, &cookie)?));
        }
    }
    let token = non_empty_or_env(&settings.slack_bot_token, "SLACK_BOT_TOKEN")
        .ok_or_else(|| AppError::MissingToken("slackBotToken / SLACK_BOT_TOKEN".to_string()))?;
    Ok(Arc::new(SlackClient::bot(&token)?))
}

fn build_drive_client(settings: &Settings) -> Result<Arc<dyn DriveApi>> {
    let token = non_empty_or_env(&settings.google_access_token, "GOOGLE_ACCESS_TOKEN")
        .ok_or_else(|| {
            AppError::MissingToken("googleAccessToken / GOOGLE_ACCESS_TOKEN".to_string())
        })?;
    Ok(Arc::new(DriveClient::new(Box::new(
        StaticTokenProvider::new(&token),
    ))?))
}

fn non_empty_or_env(value: &str, env_var: &str) -> Option<String> {
    if !value.is_empty() {
        return Some(value.to_string());
    }
    std::env::var(env_var).ok().filter(|v| !v.is_empty())
}

/// `--to` bounds are widened to the end of the day.
fn end_of_day_ts(date: NaiveDate) -> String {
    let secs = date
        .and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    format!("{}.000000", secs)
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let cut: String = name.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", cut)
}
