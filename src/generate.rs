//! The generation pipeline: fetch → summarize → assemble → store.
//!
//! One run is strictly sequential. The store is written exactly once, after
//! assembly, so a run that fails or is interrupted part-way leaves the
//! previous snapshot untouched. Two runs for the same repository are not
//! serialized against each other; whichever calls `put_snapshot` last wins.

use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::assembler::{self, AssemblyInput};
use crate::error::{Error, Result};
use crate::github::{PullRequestSource, SkippedPr};
use crate::models::{GenerationScope, Snapshot};
use crate::store::ChangelogStore;
use crate::summarizer::Summarizer;

/// Caller-controlled knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Look-back window in whole days, counted back from today (UTC).
    pub days: u32,
    /// Summarize only this PR instead of the whole window.
    pub pr: Option<i64>,
    /// Include diffs in the prompts.
    pub include_diff: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            days: 7,
            pr: None,
            include_diff: false,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub repo_id: String,
    /// Number of PRs summarized.
    pub summarized: usize,
    /// PRs left out because their diff could not be fetched.
    pub skipped: Vec<SkippedEntry>,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub pr_number: i64,
    pub reason: String,
}

impl From<SkippedPr> for SkippedEntry {
    fn from(skip: SkippedPr) -> Self {
        Self {
            pr_number: skip.number,
            reason: skip.reason,
        }
    }
}

/// Regenerate the changelog of `repo_id`.
///
/// A window run covers every day from `today - days` through today, both
/// inclusive, and fetches PRs merged since midnight UTC of the first day.
/// A single-PR run fails when the source skips that PR, leaving its stored
/// entry as it was.
pub async fn run_generation(
    store: &dyn ChangelogStore,
    source: &dyn PullRequestSource,
    summarizer: &Summarizer,
    repo_id: &str,
    options: GenerateOptions,
    now: DateTime<Utc>,
) -> Result<GenerationReport> {
    if options.days == 0 {
        return Err(Error::Validation("days must be at least 1".to_string()));
    }
    let repo = store.get_repository(repo_id).await?;

    let (scope, listing) = match options.pr {
        Some(number) if number <= 0 => {
            return Err(Error::Validation(format!("invalid PR number {}", number)));
        }
        Some(number) => {
            info!(repo = %repo.id, pr = number, "generating entry for a single pull request");
            let listing = source
                .get_pull_request(&repo, number, options.include_diff)
                .await?;
            // A skipped PR would otherwise drop its stored entry.
            if listing.pull_requests.is_empty() {
                let reason = listing
                    .skipped
                    .first()
                    .map(|s| s.reason.as_str())
                    .unwrap_or("nothing returned");
                return Err(Error::Network(format!(
                    "PR #{} could not be regenerated: {}",
                    number, reason
                )));
            }
            (GenerationScope::PullRequest(number), listing)
        }
        None => {
            let until = now.date_naive();
            let since = until
                .checked_sub_days(Days::new(u64::from(options.days)))
                .ok_or_else(|| {
                    Error::Validation(format!("days {} is out of range", options.days))
                })?;
            let since_at = since.and_time(NaiveTime::MIN).and_utc();
            info!(repo = %repo.id, %since, %until, "generating changelog window");
            let listing = source
                .list_closed_prs(&repo, since_at, options.include_diff)
                .await?;
            (GenerationScope::Window { since, until }, listing)
        }
    };

    let mut records = Vec::with_capacity(listing.pull_requests.len());
    for pr in &listing.pull_requests {
        records.push(summarizer.summarize(pr, options.include_diff).await?);
    }

    let previous = store.get_snapshot(&repo.id).await?;
    let manual_entries = store.list_manual_entries(&repo.id).await?;
    let versions: Vec<String> = store
        .list_versions(&repo.id)
        .await?
        .into_iter()
        .map(|v| v.version_label)
        .collect();

    let summarized = records.len();
    let snapshot = assembler::assemble(AssemblyInput {
        repo_id: &repo.id,
        previous: previous.as_ref(),
        manual_entries: &manual_entries,
        versions: &versions,
        scope,
        new_records: records,
        generated_at: now,
    });
    assembler::verify(&snapshot)?;

    store.put_snapshot(&repo.id, &snapshot).await?;
    info!(
        repo = %repo.id,
        summarized,
        skipped = listing.skipped.len(),
        total = snapshot.record_count(),
        "stored changelog snapshot"
    );

    Ok(GenerationReport {
        repo_id: repo.id,
        summarized,
        skipped: listing.skipped.into_iter().map(SkippedEntry::from).collect(),
        snapshot,
    })
}
