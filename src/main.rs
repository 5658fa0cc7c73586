use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use slack_docs_export::cli::{Cli, Commands};
use slack_docs_export::commands::{self, ExportArgs};
use slack_docs_export::config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the configured logLevel, otherwise info.
    let settings = Settings::load(&Path::new(&cli.config_dir).join("settings.json"))
        .unwrap_or_default();
    let default_level = if settings.log_level.is_empty() {
        "slack_docs_export=info".to_string()
    } else {
        format!("slack_docs_export={}", settings.log_level)
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Export {
            ids,
            folder,
            folder_id,
            from,
            to,
            sync,
            resume,
            parallel,
            dry_run,
        } => {
            commands::run_export(
                &cli.config_dir,
                ExportArgs {
                    ids,
                    folder,
                    folder_id,
                    from,
                    to,
                    sync,
                    resume,
                    parallel,
                    dry_run,
                },
            )
            .await
        }
        Commands::Discover => commands::run_discover(&cli.config_dir).await,
        Commands::Test => commands::run_test(&cli.config_dir).await,
        Commands::Status => commands::run_status(&cli.config_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
