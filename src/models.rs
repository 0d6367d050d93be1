//! Core data models used throughout shiplog.
//!
//! These types represent the repositories, pull requests, change records,
//! snapshots, and published versions that flow through the generation
//! pipeline and the store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Format a date as the `YYYY-MM-DD` key used in [`Snapshot::changes`].
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// A registered GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// Build a repository from an `owner/name` slug.
    ///
    /// The id is derived as `owner-name` (lower-cased) unless `id` is given;
    /// the display name defaults to the slug.
    pub fn from_slug(
        slug: &str,
        id: Option<&str>,
        display_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let (owner, name) = parse_slug(slug)?;
        let id = match id {
            Some(id) => validate_repo_id(id)?,
            None => format!("{}-{}", owner, name).to_lowercase(),
        };
        let display_name = display_name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", owner, name));

        Ok(Self {
            id,
            owner: owner.to_string(),
            name: name.to_string(),
            display_name,
            created_at,
        })
    }

    /// `owner/name`, as used in GitHub API paths.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

fn parse_slug(slug: &str) -> Result<(&str, &str)> {
    let slug = slug.trim().trim_end_matches('/');
    let slug = slug.strip_prefix("https://github.com/").unwrap_or(slug);
    let mut parts = slug.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if is_slug_part(owner) && is_slug_part(name) => {
            Ok((owner, name))
        }
        _ => Err(Error::Validation(format!(
            "repository must be in the form 'owner/repo', got '{}'",
            slug
        ))),
    }
}

fn is_slug_part(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn validate_repo_id(id: &str) -> Result<String> {
    let id = id.trim();
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if id.is_empty() || !id.chars().all(allowed) {
        return Err(Error::Validation(format!("invalid repository id '{}'", id)));
    }
    Ok(id.to_string())
}

/// A merged pull request as returned by the source client.
///
/// Transient: consumed by the summarizer and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    /// PR description; empty when the PR has none.
    pub body: String,
    pub author: String,
    pub url: String,
    /// Unified diff text; `None` when diffs were not requested.
    pub diff_text: Option<String>,
    pub merged_at: DateTime<Utc>,
    pub base_branch: String,
    pub head_branch: String,
    pub labels: Vec<String>,
}

impl PullRequest {
    /// Merge date in UTC, truncated to the day.
    pub fn merge_date(&self) -> NaiveDate {
        self.merged_at.date_naive()
    }

    /// Paths touched by the diff, in first-seen order.
    pub fn changed_files(&self) -> Option<Vec<String>> {
        let diff = self.diff_text.as_deref()?;
        let mut files: Vec<String> = Vec::new();
        for line in diff.lines() {
            if let Some(rest) = line.strip_prefix("diff --git a/") {
                if let Some((path, _)) = rest.split_once(" b/") {
                    if !files.iter().any(|f| f == path) {
                        files.push(path.to_string());
                    }
                }
            }
        }
        if files.is_empty() {
            None
        } else {
            Some(files)
        }
    }
}

/// The fixed set of change categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ChangeType {
    Feature,
    Bugfix,
    Improvement,
    Docs,
    #[default]
    Other,
}

impl ChangeType {
    pub const ALL: [ChangeType; 5] = [
        ChangeType::Feature,
        ChangeType::Bugfix,
        ChangeType::Improvement,
        ChangeType::Docs,
        ChangeType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Feature => "feature",
            ChangeType::Bugfix => "bugfix",
            ChangeType::Improvement => "improvement",
            ChangeType::Docs => "docs",
            ChangeType::Other => "other",
        }
    }

    /// Map free-form model or stored output onto the enum.
    ///
    /// Accepts common synonyms; anything unrecognized becomes `Other`.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "feature" | "features" | "feat" | "new" | "added" => ChangeType::Feature,
            "bugfix" | "bug" | "fix" | "fixes" | "bug fix" | "bug fixes" | "fixed" => {
                ChangeType::Bugfix
            }
            "improvement" | "improvements" | "enhancement" | "perf" | "performance"
            | "refactor" | "changed" => ChangeType::Improvement,
            "docs" | "doc" | "documentation" => ChangeType::Docs,
            _ => ChangeType::Other,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parsing for caller input: only the five labels are accepted.
impl FromStr for ChangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChangeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown change type '{}'; expected one of feature, bugfix, improvement, docs, other",
                    s
                ))
            })
    }
}

impl Serialize for ChangeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChangeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(ChangeType::coerce).unwrap_or_default())
    }
}

/// One categorized changelog entry, PR-derived or manual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// `None` for manually authored entries.
    #[serde(default)]
    pub pr_number: Option<i64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "type", default)]
    pub change_type: ChangeType,
    #[serde(default)]
    pub author: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Manual-entry log id; set only on manual entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_id: Option<i64>,
}

impl ChangeRecord {
    pub fn is_manual(&self) -> bool {
        self.pr_number.is_none()
    }

    /// Key used in the category index: the PR number, or the negated
    /// manual-entry id for manual entries.
    pub fn category_key(&self) -> Option<i64> {
        self.pr_number.or(self.manual_id.map(|id| -id))
    }
}

/// Caller-supplied content of a manual changelog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub summary: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(rename = "type", default)]
    pub change_type: ChangeType,
    #[serde(default)]
    pub author: Option<String>,
}

impl ManualEntry {
    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            return Err(Error::Validation("summary must not be empty".to_string()));
        }
        Ok(())
    }

    /// The record stored in the snapshot for this entry.
    pub fn into_record(self, manual_id: i64, date: NaiveDate) -> ChangeRecord {
        ChangeRecord {
            pr_number: None,
            summary: self.summary.trim().to_string(),
            details: self.details.filter(|d| !d.trim().is_empty()),
            change_type: self.change_type,
            author: self.author,
            date,
            pr_url: None,
            files: None,
            labels: Vec::new(),
            manual_id: Some(manual_id),
        }
    }
}

/// The live changelog document for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub repo_id: String,
    pub generated_at: DateTime<Utc>,
    /// `YYYY-MM-DD` → records of that day.
    #[serde(default)]
    pub changes: BTreeMap<String, Vec<ChangeRecord>>,
    /// Category label → category keys, first-seen order.
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<i64>>,
    /// Labels of published versions, in publish order.
    #[serde(default)]
    pub versions: Vec<String>,
}

impl Snapshot {
    pub fn empty(repo_id: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            generated_at,
            changes: BTreeMap::new(),
            categories: BTreeMap::new(),
            versions: Vec::new(),
        }
    }

    /// All records, oldest date first, in stored order within a day.
    pub fn records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.values().flatten()
    }

    pub fn record_count(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Find the record a category key refers to.
    pub fn find(&self, key: i64) -> Option<&ChangeRecord> {
        self.records().find(|r| r.category_key() == Some(key))
    }

    /// Append a manual record under its date and index it under its type.
    pub(crate) fn push_manual(&mut self, record: ChangeRecord) {
        if let Some(key) = record.category_key() {
            self.categories
                .entry(record.change_type.as_str().to_string())
                .or_default()
                .push(key);
        }
        self.changes
            .entry(date_key(record.date))
            .or_default()
            .push(record);
    }
}

/// An immutable, labeled copy of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub repo_id: String,
    pub version_label: String,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the copied snapshot's JSON.
    pub snapshot_ref: String,
    pub snapshot: Snapshot,
}

/// Which AI-derived entries a generation run replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationScope {
    /// Every PR-derived record dated inside `[since, until]`.
    Window { since: NaiveDate, until: NaiveDate },
    /// Only the record of this one pull request.
    PullRequest(i64),
}

impl GenerationScope {
    /// Whether a stored record is replaced by a run with this scope.
    ///
    /// Manual entries are never covered.
    pub fn covers(&self, record: &ChangeRecord) -> bool {
        match (self, record.pr_number) {
            (_, None) => false,
            (GenerationScope::Window { since, until }, Some(_)) => {
                record.date >= *since && record.date <= *until
            }
            (GenerationScope::PullRequest(number), Some(pr)) => *number == pr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(pr: Option<i64>, date: &str) -> ChangeRecord {
        ChangeRecord {
            pr_number: pr,
            summary: "s".into(),
            details: None,
            change_type: ChangeType::Other,
            author: None,
            date: day(date),
            pr_url: None,
            files: None,
            labels: vec![],
            manual_id: if pr.is_none() { Some(4) } else { None },
        }
    }

    #[test]
    fn test_repository_from_slug_derives_id() {
        let now = Utc::now();
        let repo = Repository::from_slug("Acme/Widgets", None, None, now).unwrap();
        assert_eq!(repo.id, "acme-widgets");
        assert_eq!(repo.display_name, "Acme/Widgets");
        assert_eq!(repo.slug(), "Acme/Widgets");
        assert_eq!(repo.url(), "https://github.com/Acme/Widgets");
    }

    #[test]
    fn test_repository_from_slug_rejects_bad_input() {
        let now = Utc::now();
        assert!(Repository::from_slug("widgets", None, None, now).is_err());
        assert!(Repository::from_slug("a/b/c", None, None, now).is_err());
        assert!(Repository::from_slug("a/b", Some("bad id"), None, now).is_err());
    }

    #[test]
    fn test_change_type_strict_and_lenient() {
        assert_eq!("docs".parse::<ChangeType>().unwrap(), ChangeType::Docs);
        assert!(matches!(
            "breaking".parse::<ChangeType>(),
            Err(Error::Validation(_))
        ));
        assert_eq!(ChangeType::coerce("Bug Fix"), ChangeType::Bugfix);
        assert_eq!(ChangeType::coerce("breaking"), ChangeType::Other);
        assert_eq!(ChangeType::coerce(""), ChangeType::Other);
    }

    #[test]
    fn test_change_type_deserializes_unknown_as_other() {
        let t: ChangeType = serde_json::from_str("\"security\"").unwrap();
        assert_eq!(t, ChangeType::Other);
        let t: ChangeType = serde_json::from_str("null").unwrap();
        assert_eq!(t, ChangeType::Other);
    }

    #[test]
    fn test_changed_files_from_diff() {
        let pr = PullRequest {
            number: 1,
            title: "t".into(),
            body: String::new(),
            author: "a".into(),
            url: "u".into(),
            diff_text: Some(
                "diff --git a/src/lib.rs b/src/lib.rs\n+x\ndiff --git a/README.md b/README.md\n-y\n"
                    .into(),
            ),
            merged_at: Utc::now(),
            base_branch: "main".into(),
            head_branch: "feat".into(),
            labels: vec![],
        };
        assert_eq!(
            pr.changed_files(),
            Some(vec!["src/lib.rs".to_string(), "README.md".to_string()])
        );
    }

    #[test]
    fn test_scope_never_covers_manual_entries() {
        let window = GenerationScope::Window {
            since: day("2024-01-01"),
            until: day("2024-01-07"),
        };
        assert!(window.covers(&record(Some(1), "2024-01-03")));
        assert!(!window.covers(&record(Some(1), "2023-12-31")));
        assert!(!window.covers(&record(None, "2024-01-03")));

        let single = GenerationScope::PullRequest(7);
        assert!(single.covers(&record(Some(7), "2020-01-01")));
        assert!(!single.covers(&record(Some(8), "2020-01-01")));
    }

    #[test]
    fn test_manual_category_key_is_negative() {
        let r = record(None, "2024-01-05");
        assert_eq!(r.category_key(), Some(-4));
    }
}
