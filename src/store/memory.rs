//! In-memory [`ChangelogStore`] for tests and embedding.
//!
//! All state sits behind one `Mutex`, so every operation is atomic with
//! respect to the others, matching the per-call transactions of the SQLite
//! backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::{nothing_to_publish, repo_not_found, snapshot_ref, validate_label, ChangelogStore};
use crate::error::{Error, Result};
use crate::models::{ChangeRecord, ManualEntry, Repository, Snapshot, Version};

struct RepoState {
    repo: Repository,
    snapshot: Option<Snapshot>,
    manual: Vec<ChangeRecord>,
    versions: Vec<Version>,
}

impl RepoState {
    fn new(repo: Repository) -> Self {
        Self {
            repo,
            snapshot: None,
            manual: Vec::new(),
            versions: Vec::new(),
        }
    }
}

#[derive(Default)]
struct State {
    repos: BTreeMap<String, RepoState>,
    next_manual_id: i64,
}

impl State {
    fn repo_mut(&mut self, id: &str) -> Result<&mut RepoState> {
        self.repos.get_mut(id).ok_or_else(|| repo_not_found(id))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChangelogStore for InMemoryStore {
    async fn create_repository(&self, repo: &Repository) -> Result<()> {
        let mut state = self.lock();
        if state.repos.contains_key(&repo.id) {
            return Err(Error::Duplicate(repo.id.clone()));
        }
        state
            .repos
            .insert(repo.id.clone(), RepoState::new(repo.clone()));
        Ok(())
    }

    async fn get_repository(&self, id: &str) -> Result<Repository> {
        Ok(self.lock().repo_mut(id)?.repo.clone())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let state = self.lock();
        let mut repos: Vec<Repository> =
            state.repos.values().map(|r| r.repo.clone()).collect();
        repos.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(repos)
    }

    async fn rename_repository(&self, id: &str, display_name: &str) -> Result<Repository> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(Error::Validation("display name must not be empty".to_string()));
        }
        let mut state = self.lock();
        let repo = &mut state.repo_mut(id)?.repo;
        repo.display_name = display_name.to_string();
        Ok(repo.clone())
    }

    async fn delete_repository(&self, id: &str) -> Result<()> {
        self.lock()
            .repos
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| repo_not_found(id))
    }

    async fn get_snapshot(&self, repo_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.lock().repo_mut(repo_id)?.snapshot.clone())
    }

    async fn put_snapshot(&self, repo_id: &str, snapshot: &Snapshot) -> Result<()> {
        self.lock().repo_mut(repo_id)?.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn add_manual_entry(
        &self,
        repo_id: &str,
        date: NaiveDate,
        entry: ManualEntry,
    ) -> Result<ChangeRecord> {
        entry.validate()?;
        let mut state = self.lock();
        state.repo_mut(repo_id)?;
        state.next_manual_id += 1;
        let id = state.next_manual_id;

        let record = entry.into_record(id, date);
        let repo = state.repo_mut(repo_id)?;
        repo.manual.push(record.clone());
        repo.snapshot
            .get_or_insert_with(|| Snapshot::empty(repo_id, Utc::now()))
            .push_manual(record.clone());
        Ok(record)
    }

    async fn list_manual_entries(&self, repo_id: &str) -> Result<Vec<ChangeRecord>> {
        Ok(self.lock().repo_mut(repo_id)?.manual.clone())
    }

    async fn publish(&self, repo_id: &str, label: &str) -> Result<Version> {
        let label = validate_label(label)?;
        let mut state = self.lock();
        let repo = state.repo_mut(repo_id)?;

        if repo.versions.iter().any(|v| v.version_label == label) {
            return Err(Error::DuplicateVersion {
                repo_id: repo_id.to_string(),
                label: label.to_string(),
            });
        }
        let live = repo
            .snapshot
            .as_mut()
            .ok_or_else(|| nothing_to_publish(repo_id))?;

        let version = Version {
            repo_id: repo_id.to_string(),
            version_label: label.to_string(),
            created_at: Utc::now(),
            snapshot_ref: snapshot_ref(live)?,
            snapshot: live.clone(),
        };
        live.versions.push(label.to_string());
        repo.versions.push(version.clone());
        Ok(version)
    }

    async fn get_version(&self, repo_id: &str, label: &str) -> Result<Version> {
        self.lock()
            .repo_mut(repo_id)?
            .versions
            .iter()
            .find(|v| v.version_label == label)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("version '{}' of repository '{}'", label, repo_id))
            })
    }

    async fn list_versions(&self, repo_id: &str) -> Result<Vec<Version>> {
        Ok(self.lock().repo_mut(repo_id)?.versions.clone())
    }
}
