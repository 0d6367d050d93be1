//! Implementations of the CLI commands.
//!
//! Each function takes an explicit store handle, performs one operation,
//! and prints its result to stdout. Diagnostics go through `tracing` to
//! stderr, so stdout stays pipeable.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::path::Path;

use crate::export::{render_markdown, write_output};
use crate::generate::{run_generation, GenerateOptions};
use crate::github::PullRequestSource;
use crate::models::{ChangeType, ManualEntry, Repository, Snapshot};
use crate::store::ChangelogStore;
use crate::summarizer::Summarizer;

/// `init <owner/repo>`: register a repository.
pub async fn run_init(
    store: &dyn ChangelogStore,
    slug: &str,
    name: Option<&str>,
    id: Option<&str>,
) -> Result<()> {
    let repo = Repository::from_slug(slug, id, name, Utc::now())?;
    store.create_repository(&repo).await?;
    println!(
        "Registered {} as '{}' (id: {})",
        repo.slug(),
        repo.display_name,
        repo.id
    );
    Ok(())
}

/// `list`: print all repositories as a table.
pub async fn run_list(store: &dyn ChangelogStore) -> Result<()> {
    let repos = store.list_repositories().await?;
    if repos.is_empty() {
        println!("No repositories registered.");
        return Ok(());
    }

    let id_width = repos.iter().map(|r| r.id.len()).max().unwrap_or(2).max(2);
    let name_width = repos
        .iter()
        .map(|r| r.display_name.len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!(
        "{:<id_width$}  {:<name_width$}  {}",
        "ID",
        "NAME",
        "REPOSITORY",
        id_width = id_width,
        name_width = name_width
    );
    for repo in &repos {
        println!(
            "{:<id_width$}  {:<name_width$}  {}",
            repo.id,
            repo.display_name,
            repo.slug(),
            id_width = id_width,
            name_width = name_width
        );
    }
    Ok(())
}

/// `rename`: change a repository's display name.
pub async fn run_rename(store: &dyn ChangelogStore, repo_id: &str, name: &str) -> Result<()> {
    let repo = store.rename_repository(repo_id, name).await?;
    println!("Renamed {} to '{}'", repo.id, repo.display_name);
    Ok(())
}

/// `delete`: remove a repository and everything stored for it.
pub async fn run_delete(store: &dyn ChangelogStore, repo_id: &str) -> Result<()> {
    store.delete_repository(repo_id).await?;
    println!("Deleted {}", repo_id);
    Ok(())
}

/// `generate`: run the pipeline and report what happened.
pub async fn run_generate(
    store: &dyn ChangelogStore,
    source: &dyn PullRequestSource,
    summarizer: &Summarizer,
    repo_id: &str,
    options: GenerateOptions,
) -> Result<()> {
    let report = run_generation(store, source, summarizer, repo_id, options, Utc::now()).await?;

    println!(
        "Generated {} entr{} for {} ({} total in changelog)",
        report.summarized,
        if report.summarized == 1 { "y" } else { "ies" },
        report.repo_id,
        report.snapshot.record_count()
    );
    if !report.skipped.is_empty() {
        println!("Skipped {} pull request(s):", report.skipped.len());
        for skip in &report.skipped {
            println!("  #{}: {}", skip.pr_number, skip.reason);
        }
    }
    Ok(())
}

/// Fields of the `add` command.
#[derive(Debug, Clone)]
pub struct AddArgs<'a> {
    pub summary: &'a str,
    pub details: Option<&'a str>,
    pub change_type: Option<&'a str>,
    pub author: Option<&'a str>,
    pub date: Option<NaiveDate>,
}

/// `add`: append a manual entry.
pub async fn run_add(store: &dyn ChangelogStore, repo_id: &str, args: AddArgs<'_>) -> Result<()> {
    let change_type = match args.change_type {
        Some(raw) => raw.parse::<ChangeType>()?,
        None => ChangeType::Other,
    };
    let entry = ManualEntry {
        summary: args.summary.to_string(),
        details: args.details.map(str::to_string),
        change_type,
        author: args.author.map(str::to_string),
    };
    entry.validate()?;

    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let record = store.add_manual_entry(repo_id, date, entry).await?;
    println!(
        "Added {} entry to {} on {}",
        record.change_type, repo_id, record.date
    );
    Ok(())
}

async fn title_for(store: &dyn ChangelogStore, repo_id: &str) -> Result<String> {
    let repo = store.get_repository(repo_id).await?;
    Ok(format!("{} Changelog", repo.display_name))
}

fn print_snapshot(snapshot: &Snapshot, title: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        print!("{}", render_markdown(snapshot, title));
    }
    Ok(())
}

/// `preview`: print the live changelog without changing anything.
pub async fn run_preview(store: &dyn ChangelogStore, repo_id: &str, json: bool) -> Result<()> {
    let title = title_for(store, repo_id).await?;
    let snapshot = store
        .get_snapshot(repo_id)
        .await?
        .unwrap_or_else(|| Snapshot::empty(repo_id, Utc::now()));
    print_snapshot(&snapshot, &title, json)
}

/// `publish`: freeze the live changelog under a label, optionally writing
/// the published Markdown to `output`.
pub async fn run_publish(
    store: &dyn ChangelogStore,
    repo_id: &str,
    label: &str,
    output: Option<&Path>,
) -> Result<()> {
    let version = store.publish(repo_id, label).await?;
    println!(
        "Published {} for {} ({} entries, ref {})",
        version.version_label,
        repo_id,
        version.snapshot.record_count(),
        &version.snapshot_ref[..12.min(version.snapshot_ref.len())]
    );

    if let Some(path) = output {
        let title = format!("{} {}", title_for(store, repo_id).await?, version.version_label);
        write_output(&render_markdown(&version.snapshot, &title), Some(path))?;
    }
    Ok(())
}

/// `versions`: list published labels, oldest first.
pub async fn run_versions(store: &dyn ChangelogStore, repo_id: &str) -> Result<()> {
    let versions = store.list_versions(repo_id).await?;
    if versions.is_empty() {
        println!("No versions published for {}.", repo_id);
        return Ok(());
    }
    for version in &versions {
        println!(
            "{}  {}  {} entries",
            version.version_label,
            version.created_at.format("%Y-%m-%d %H:%M UTC"),
            version.snapshot.record_count()
        );
    }
    Ok(())
}

/// `export`: render the live changelog, or a published version, as
/// Markdown or JSON.
pub async fn run_export(
    store: &dyn ChangelogStore,
    repo_id: &str,
    version: Option<&str>,
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let base_title = title_for(store, repo_id).await?;
    let (snapshot, title) = match version {
        Some(label) => {
            let v = store
                .get_version(repo_id, label)
                .await
                .with_context(|| format!("Failed to load version '{}'", label))?;
            (v.snapshot, format!("{} {}", base_title, v.version_label))
        }
        None => (
            store
                .get_snapshot(repo_id)
                .await?
                .unwrap_or_else(|| Snapshot::empty(repo_id, Utc::now())),
            base_title,
        ),
    };

    let rendered = if json {
        format!("{}\n", serde_json::to_string_pretty(&snapshot)?)
    } else {
        render_markdown(&snapshot, &title)
    };
    write_output(&rendered, output)
}
