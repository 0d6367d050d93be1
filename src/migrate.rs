use sqlx::SqlitePool;

use crate::error::Result;

/// Create all tables and indexes. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Registered repositories
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_updated TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live snapshot document per repository
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            repo_id TEXT PRIMARY KEY,
            generated_at TEXT NOT NULL,
            data TEXT NOT NULL,
            FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only manual entry log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manual_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id TEXT NOT NULL,
            date TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Published versions; rows are never updated
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS versions (
            repo_id TEXT NOT NULL,
            label TEXT NOT NULL,
            created_at TEXT NOT NULL,
            snapshot_ref TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (repo_id, label),
            FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_manual_entries_repo ON manual_entries(repo_id, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_versions_created ON versions(repo_id, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
