//! Storage abstraction for repositories, snapshots, manual entries, and
//! published versions.
//!
//! The [`ChangelogStore`] trait is the only way state is read or mutated;
//! the generation pipeline and the CLI/HTTP layers receive a store handle
//! explicitly. Two backends are provided:
//!
//! - [`sqlite::SqliteStore`] — the durable local datastore.
//! - [`memory::InMemoryStore`] — for tests and embedding.
//!
//! # Semantics
//!
//! | Method | Behavior |
//! |--------|----------|
//! | [`create_repository`](ChangelogStore::create_repository) | fails with `Duplicate` if the id exists |
//! | [`delete_repository`](ChangelogStore::delete_repository) | removes the repo and all its snapshot/manual/version state |
//! | [`put_snapshot`](ChangelogStore::put_snapshot) | overwrites the whole live document; the last writer wins |
//! | [`add_manual_entry`](ChangelogStore::add_manual_entry) | appends to the log and to the live snapshot, leaving PR-derived records alone |
//! | [`publish`](ChangelogStore::publish) | copies the live snapshot under an immutable label; `DuplicateVersion` if taken |
//!
//! No locking is performed across calls: two concurrent generations for
//! the same repository race on `put_snapshot` and the later write wins.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{ChangeRecord, ManualEntry, Repository, Snapshot, Version};

#[async_trait]
pub trait ChangelogStore: Send + Sync {
    /// Register a repository. Fails with [`Error::Duplicate`] if the id is taken.
    async fn create_repository(&self, repo: &Repository) -> Result<()>;

    /// Fetch a repository. Fails with [`Error::NotFound`] if unknown.
    async fn get_repository(&self, id: &str) -> Result<Repository>;

    /// All repositories, ordered by display name.
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Change a repository's display name, the only mutable field.
    async fn rename_repository(&self, id: &str, display_name: &str) -> Result<Repository>;

    /// Delete a repository and everything stored for it.
    async fn delete_repository(&self, id: &str) -> Result<()>;

    /// The live snapshot, or `None` if nothing has been generated or added yet.
    async fn get_snapshot(&self, repo_id: &str) -> Result<Option<Snapshot>>;

    /// Replace the live snapshot wholesale.
    async fn put_snapshot(&self, repo_id: &str, snapshot: &Snapshot) -> Result<()>;

    /// Append a manual entry dated `date` and return the stored record.
    async fn add_manual_entry(
        &self,
        repo_id: &str,
        date: NaiveDate,
        entry: ManualEntry,
    ) -> Result<ChangeRecord>;

    /// The manual-entry log, oldest first.
    async fn list_manual_entries(&self, repo_id: &str) -> Result<Vec<ChangeRecord>>;

    /// Publish the current live snapshot under `label`.
    async fn publish(&self, repo_id: &str, label: &str) -> Result<Version>;

    /// Read a published version. Fails with [`Error::NotFound`] if absent.
    async fn get_version(&self, repo_id: &str, label: &str) -> Result<Version>;

    /// All published versions, oldest first.
    async fn list_versions(&self, repo_id: &str) -> Result<Vec<Version>>;
}

/// Hex SHA-256 of a snapshot's JSON encoding.
pub fn snapshot_ref(snapshot: &Snapshot) -> Result<String> {
    let bytes = serde_json::to_vec(snapshot)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn validate_label(label: &str) -> Result<&str> {
    let label = label.trim();
    if label.is_empty() {
        return Err(Error::Validation("version label must not be empty".to_string()));
    }
    if label.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(Error::Validation(format!(
            "version label '{}' must not contain whitespace or '/'",
            label
        )));
    }
    Ok(label)
}

pub(crate) fn repo_not_found(id: &str) -> Error {
    Error::NotFound(format!("repository '{}'", id))
}

pub(crate) fn nothing_to_publish(id: &str) -> Error {
    Error::NotFound(format!("no changelog to publish for repository '{}'", id))
}
