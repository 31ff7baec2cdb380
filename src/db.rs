//! SQLite-backed index store.
//!
//! Holds the two ingestion artifacts: the chunk mapping (`chunks`) and the
//! unit-normalized embedding vectors (`chunk_vectors`). Both are written
//! only by `aguard ingest` and read-only during query serving.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the index-store schema. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            source TEXT NOT NULL,
            chunk_id INTEGER NOT NULL,
            title TEXT,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            PRIMARY KEY (source, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            source TEXT NOT NULL,
            chunk_id INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (source, chunk_id),
            FOREIGN KEY (source, chunk_id) REFERENCES chunks(source, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}
