//! # Shiplog CLI (`shiplog`)
//!
//! Turns merged GitHub pull requests into a categorized changelog.
//!
//! ## Usage
//!
//! ```bash
//! shiplog --config ./config/shiplog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shiplog init <owner/repo>` | Register a repository |
//! | `shiplog list` | List registered repositories |
//! | `shiplog generate --repo <id>` | Summarize recent PRs into the changelog |
//! | `shiplog add --repo <id> --summary <s>` | Add a manual entry |
//! | `shiplog preview --repo <id>` | Print the live changelog |
//! | `shiplog publish --repo <id> --version <label>` | Freeze the changelog under a label |
//! | `shiplog versions --repo <id>` | List published versions |
//! | `shiplog export --repo <id>` | Write the changelog (or a version) to stdout or a file |
//! | `shiplog rename --repo <id> --name <n>` | Change a repository's display name |
//! | `shiplog delete --repo <id>` | Delete a repository and its history |
//! | `shiplog serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! shiplog init acme/widgets --name "Widgets"
//! GITHUB_TOKEN=... ANTHROPIC_API_KEY=... shiplog generate --repo acme-widgets --days 14
//! shiplog add --repo acme-widgets --summary "Docs pass" --type docs
//! shiplog publish --repo acme-widgets --version v1.2.0 --output CHANGELOG.md
//! ```
//!
//! Exit status is 0 on success and non-zero on any error: 2 for invalid
//! input or configuration, 3 for unknown repositories or versions, 4 for
//! duplicates, 5 for rejected credentials, 6 for exhausted rate limits, 7
//! for other upstream failures, 1 otherwise.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use shiplog::commands::{self, AddArgs};
use shiplog::completion::create_completion_service;
use shiplog::config::{self, Config};
use shiplog::error::Error;
use shiplog::generate::GenerateOptions;
use shiplog::github::GitHubClient;
use shiplog::retry::RetryPolicy;
use shiplog::server;
use shiplog::store::sqlite::SqliteStore;
use shiplog::summarizer::Summarizer;

/// Shiplog: AI-summarized changelogs from merged pull requests.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shiplog.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "shiplog",
    about = "Shiplog: AI-summarized, categorized changelogs from merged GitHub pull requests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/shiplog.toml` when present, otherwise built-in
    /// defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GitHub token; overrides the configured token environment variable.
    #[arg(long, global = true)]
    github_token: Option<String>,

    /// Anthropic API key; overrides the configured key environment variable.
    #[arg(long, global = true)]
    anthropic_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a GitHub repository.
    Init {
        /// Repository as `owner/name`.
        repo: String,

        /// Display name; defaults to `owner/name`.
        #[arg(long)]
        name: Option<String>,

        /// Explicit id; defaults to `owner-name` in lowercase.
        #[arg(long)]
        id: Option<String>,
    },

    /// List registered repositories.
    List,

    /// Summarize merged pull requests into the live changelog.
    ///
    /// Replaces every PR-derived entry inside the window with a fresh
    /// summary; manual entries and published versions are left alone.
    Generate {
        #[arg(long)]
        repo: String,

        /// Look-back window in days.
        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Regenerate only this pull request's entry.
        #[arg(long)]
        pr: Option<i64>,

        /// Send PR diffs to the model (truncated to `ai.diff_budget`).
        #[arg(long)]
        include_diff: bool,
    },

    /// Add a manual changelog entry.
    Add {
        #[arg(long)]
        repo: String,

        #[arg(long)]
        summary: String,

        #[arg(long)]
        details: Option<String>,

        /// One of feature, bugfix, improvement, docs, other.
        #[arg(long = "type")]
        change_type: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Entry date (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print the live changelog without modifying it.
    Preview {
        #[arg(long)]
        repo: String,

        /// Print the raw snapshot as JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },

    /// Publish the live changelog under an immutable version label.
    Publish {
        #[arg(long)]
        repo: String,

        #[arg(long)]
        version: String,

        /// Also write the published changelog as Markdown to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List published versions.
    Versions {
        #[arg(long)]
        repo: String,
    },

    /// Render the live changelog or a published version.
    Export {
        #[arg(long)]
        repo: String,

        /// Published version to export instead of the live changelog.
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        json: bool,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Change a repository's display name.
    Rename {
        #[arg(long)]
        repo: String,

        #[arg(long)]
        name: String,
    },

    /// Delete a repository with its changelog, manual entries, and versions.
    Delete {
        #[arg(long)]
        repo: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shiplog=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.chain().find_map(|cause| cause.downcast_ref::<Error>()) {
        return e.exit_code();
    }
    if err.chain().any(|cause| cause.is::<std::io::Error>()) {
        return 1;
    }
    // Remaining errors come from config loading and validation.
    2
}

fn load(cli: &Cli) -> Result<Config> {
    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(token) = cli.github_token.clone() {
        cfg.github.token = Some(token);
    }
    if let Some(key) = cli.anthropic_key.clone() {
        cfg.ai.api_key = Some(key);
    }
    Ok(cfg)
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = load(&cli)?;
    let store = Arc::new(SqliteStore::open(&cfg).await?);
    let result = dispatch(&cfg, store.clone(), cli.command).await;
    store.close().await;
    result
}

async fn dispatch(cfg: &Config, shared: Arc<SqliteStore>, command: Commands) -> Result<()> {
    let store = shared.as_ref();
    match command {
        Commands::Init { repo, name, id } => {
            commands::run_init(store, &repo, name.as_deref(), id.as_deref()).await
        }
        Commands::List => commands::run_list(store).await,
        Commands::Generate {
            repo,
            days,
            pr,
            include_diff,
        } => {
            let retry = RetryPolicy::from_config(&cfg.retry);
            let completion = create_completion_service(&cfg.ai, retry)?;
            let summarizer = Summarizer::from_config(Arc::from(completion), &cfg.ai);
            let source = GitHubClient::new(&cfg.github, retry)?;
            let options = GenerateOptions {
                days,
                pr,
                include_diff,
            };
            commands::run_generate(store, &source, &summarizer, &repo, options).await
        }
        Commands::Add {
            repo,
            summary,
            details,
            change_type,
            author,
            date,
        } => {
            let args = AddArgs {
                summary: &summary,
                details: details.as_deref(),
                change_type: change_type.as_deref(),
                author: author.as_deref(),
                date,
            };
            commands::run_add(store, &repo, args).await
        }
        Commands::Preview { repo, json } => commands::run_preview(store, &repo, json).await,
        Commands::Publish {
            repo,
            version,
            output,
        } => commands::run_publish(store, &repo, &version, output.as_deref()).await,
        Commands::Versions { repo } => commands::run_versions(store, &repo).await,
        Commands::Export {
            repo,
            version,
            json,
            output,
        } => {
            commands::run_export(store, &repo, version.as_deref(), json, output.as_deref()).await
        }
        Commands::Rename { repo, name } => commands::run_rename(store, &repo, &name).await,
        Commands::Delete { repo } => commands::run_delete(store, &repo).await,
        Commands::Serve => server::run_server(cfg, shared.clone()).await,
    }
}
