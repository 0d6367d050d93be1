//! SQLite-backed [`ChangelogStore`].
//!
//! Snapshots, manual entries, and versions are stored as JSON documents;
//! repositories are plain rows. Multi-step operations run in a single
//! transaction so a failed call leaves the previous state intact.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::{nothing_to_publish, repo_not_found, snapshot_ref, validate_label, ChangelogStore};
use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{date_key, ChangeRecord, ManualEntry, Repository, Snapshot, Version};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and apply migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn open_at(path: &std::path::Path) -> Result<Self> {
        let pool = db::connect_at(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_repo(&self, tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(repo_not_found(id))
        }
    }

    async fn load_snapshot(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        repo_id: &str,
    ) -> Result<Option<Snapshot>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM snapshots WHERE repo_id = ?")
                .bind(repo_id)
                .fetch_optional(&mut **tx)
                .await?;
        data.map(|d| serde_json::from_str(&d).map_err(Error::from))
            .transpose()
    }

    async fn write_snapshot(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        repo_id: &str,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (repo_id, generated_at, data) VALUES (?, ?, ?)
            ON CONFLICT(repo_id) DO UPDATE SET
                generated_at = excluded.generated_at,
                data = excluded.data
            "#,
        )
        .bind(repo_id)
        .bind(format_ts(&snapshot.generated_at))
        .bind(&data)
        .execute(&mut **tx)
        .await?;

        sqlx::query("UPDATE repositories SET last_updated = ? WHERE id = ?")
            .bind(format_ts(&Utc::now()))
            .bind(repo_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(sqlx::Error::Decode(Box::new(e))))
}

fn repo_from_row(row: &SqliteRow) -> Result<Repository> {
    Ok(Repository {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn manual_from_row(row: &SqliteRow) -> Result<ChangeRecord> {
    let id: i64 = row.try_get("id")?;
    let date_raw: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
        .map_err(|e| Error::Storage(sqlx::Error::Decode(Box::new(e))))?;
    let entry: ManualEntry = serde_json::from_str(&row.try_get::<String, _>("data")?)?;
    Ok(entry.into_record(id, date))
}

fn version_from_row(row: &SqliteRow) -> Result<Version> {
    Ok(Version {
        repo_id: row.try_get("repo_id")?,
        version_label: row.try_get("label")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        snapshot_ref: row.try_get("snapshot_ref")?,
        snapshot: serde_json::from_str(&row.try_get::<String, _>("data")?)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

#[async_trait]
impl ChangelogStore for SqliteStore {
    async fn create_repository(&self, repo: &Repository) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO repositories (id, owner, name, display_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&repo.id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.display_name)
        .bind(format_ts(&repo.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(repo = %repo.id, "registered repository {}", repo.slug());
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(Error::Duplicate(repo.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_repository(&self, id: &str) -> Result<Repository> {
        let row = sqlx::query(
            "SELECT id, owner, name, display_name, created_at FROM repositories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => repo_from_row(&row),
            None => Err(repo_not_found(id)),
        }
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query(
            "SELECT id, owner, name, display_name, created_at FROM repositories ORDER BY display_name, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(repo_from_row).collect()
    }

    async fn rename_repository(&self, id: &str, display_name: &str) -> Result<Repository> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(Error::Validation("display name must not be empty".to_string()));
        }

        let updated = sqlx::query("UPDATE repositories SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(repo_not_found(id));
        }
        self.get_repository(id).await
    }

    async fn delete_repository(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, id).await?;

        // Explicit deletes keep the cascade independent of the pragma.
        for table in ["versions", "manual_entries", "snapshots"] {
            sqlx::query(&format!("DELETE FROM {} WHERE repo_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(repo = %id, "deleted repository");
        Ok(())
    }

    async fn get_snapshot(&self, repo_id: &str) -> Result<Option<Snapshot>> {
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;
        let snapshot = self.load_snapshot(&mut tx, repo_id).await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    async fn put_snapshot(&self, repo_id: &str, snapshot: &Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;
        self.write_snapshot(&mut tx, repo_id, snapshot).await?;
        tx.commit().await?;
        debug!(repo = %repo_id, records = snapshot.record_count(), "snapshot written");
        Ok(())
    }

    async fn add_manual_entry(
        &self,
        repo_id: &str,
        date: NaiveDate,
        entry: ManualEntry,
    ) -> Result<ChangeRecord> {
        entry.validate()?;
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;

        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO manual_entries (repo_id, date, data, created_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(repo_id)
        .bind(date_key(date))
        .bind(serde_json::to_string(&entry)?)
        .bind(format_ts(&now))
        .fetch_one(&mut *tx)
        .await?;

        let record = entry.into_record(id, date);
        let mut snapshot = self
            .load_snapshot(&mut tx, repo_id)
            .await?
            .unwrap_or_else(|| Snapshot::empty(repo_id, now));
        snapshot.push_manual(record.clone());
        self.write_snapshot(&mut tx, repo_id, &snapshot).await?;

        tx.commit().await?;
        info!(repo = %repo_id, manual_id = id, "added manual entry for {}", date_key(date));
        Ok(record)
    }

    async fn list_manual_entries(&self, repo_id: &str) -> Result<Vec<ChangeRecord>> {
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;
        let rows = sqlx::query(
            "SELECT id, date, data FROM manual_entries WHERE repo_id = ? ORDER BY id",
        )
        .bind(repo_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.iter().map(manual_from_row).collect()
    }

    async fn publish(&self, repo_id: &str, label: &str) -> Result<Version> {
        let label = validate_label(label)?;
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;

        let taken: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM versions WHERE repo_id = ? AND label = ?")
                .bind(repo_id)
                .bind(label)
                .fetch_one(&mut *tx)
                .await?;
        if taken {
            return Err(Error::DuplicateVersion {
                repo_id: repo_id.to_string(),
                label: label.to_string(),
            });
        }

        let mut live = self
            .load_snapshot(&mut tx, repo_id)
            .await?
            .ok_or_else(|| nothing_to_publish(repo_id))?;

        let version = Version {
            repo_id: repo_id.to_string(),
            version_label: label.to_string(),
            created_at: Utc::now(),
            snapshot_ref: snapshot_ref(&live)?,
            snapshot: live.clone(),
        };

        let inserted = sqlx::query(
            "INSERT INTO versions (repo_id, label, created_at, snapshot_ref, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(repo_id)
        .bind(label)
        .bind(format_ts(&version.created_at))
        .bind(&version.snapshot_ref)
        .bind(serde_json::to_string(&version.snapshot)?)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::DuplicateVersion {
                    repo_id: repo_id.to_string(),
                    label: label.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        live.versions.push(label.to_string());
        self.write_snapshot(&mut tx, repo_id, &live).await?;

        tx.commit().await?;
        info!(repo = %repo_id, version = %label, "published version");
        Ok(version)
    }

    async fn get_version(&self, repo_id: &str, label: &str) -> Result<Version> {
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;
        let row = sqlx::query(
            "SELECT repo_id, label, created_at, snapshot_ref, data FROM versions WHERE repo_id = ? AND label = ?",
        )
        .bind(repo_id)
        .bind(label)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match row {
            Some(row) => version_from_row(&row),
            None => Err(Error::NotFound(format!(
                "version '{}' of repository '{}'",
                label, repo_id
            ))),
        }
    }

    async fn list_versions(&self, repo_id: &str) -> Result<Vec<Version>> {
        let mut tx = self.pool.begin().await?;
        self.ensure_repo(&mut tx, repo_id).await?;
        let rows = sqlx::query(
            "SELECT repo_id, label, created_at, snapshot_ref, data FROM versions WHERE repo_id = ? ORDER BY rowid",
        )
        .bind(repo_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.iter().map(version_from_row).collect()
    }
}
