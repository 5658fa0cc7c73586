use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slack-docs-export")]
#[command(about = "Export Slack conversations into a dated tree of Google Docs")]
pub struct Cli {
    /// Directory holding conversations.json, people.json and settings.json
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export conversations to Google Docs
    Export {
        /// Conversation ids to export (default: all with export=true)
        ids: Vec<String>,

        /// Google Drive root folder name (ignored if --folder-id is set)
        #[arg(long, default_value = "Slack Exports")]
        folder: String,

        /// Existing Google Drive folder id to export into
        #[arg(long, default_value = "")]
        folder_id: String,

        /// Export messages from this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Export messages up to this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Only export messages since the last successful export
        #[arg(long)]
        sync: bool,

        /// Skip conversations already marked complete
        #[arg(long)]
        resume: bool,

        /// Conversations to export concurrently (max 5)
        #[arg(long, default_value_t = 1)]
        parallel: usize,

        /// Show what would be exported without exporting
        #[arg(long)]
        dry_run: bool,
    },

    /// List conversations visible to the configured Slack token
    Discover,

    /// Verify Slack API access for the configured conversations
    Test,

    /// Show per-conversation export progress from the index
    Status,
}
