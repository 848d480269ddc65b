//! Database initialization
//!
//! Creates the SQLite file on first run and the curation tables
//! idempotently (`CREATE TABLE IF NOT EXISTS`).

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a writer waits for the database lock
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .foreign_keys(true)
                // Vote transactions wait for each other instead of failing
                .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
        )
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to one connection that is never recycled: every
/// `sqlite::memory:` connection is a separate database.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all curation tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_datasets_table(pool).await?;
    create_taxonomy_tables(pool).await?;
    create_sounds_tables(pool).await?;
    create_candidate_annotations_table(pool).await?;
    create_votes_table(pool).await?;
    create_ground_truth_tables(pool).await?;

    Ok(())
}

async fn create_datasets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            short_name TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_taxonomy_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxonomy_nodes (
            node_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            citation_uri TEXT NOT NULL DEFAULT '',
            is_abstract INTEGER NOT NULL DEFAULT 0,
            omitted INTEGER NOT NULL DEFAULT 0,
            advanced_task INTEGER NOT NULL DEFAULT 1,
            beginner_task INTEGER NOT NULL DEFAULT 0,
            nb_ground_truth INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Structural hierarchy: parent is the broader category
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxonomy_parents (
            node_id TEXT NOT NULL REFERENCES taxonomy_nodes(node_id) ON DELETE CASCADE,
            parent_id TEXT NOT NULL REFERENCES taxonomy_nodes(node_id) ON DELETE CASCADE,
            PRIMARY KEY (node_id, parent_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Curated subset of ancestry along which ground truth is copied upward
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxonomy_propagation (
            node_id TEXT NOT NULL REFERENCES taxonomy_nodes(node_id) ON DELETE CASCADE,
            parent_id TEXT NOT NULL REFERENCES taxonomy_nodes(node_id) ON DELETE CASCADE,
            PRIMARY KEY (node_id, parent_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sounds_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sounds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            freesound_id INTEGER NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            duration REAL,
            deleted_in_freesound INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sound_datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sound_id INTEGER NOT NULL REFERENCES sounds(id) ON DELETE CASCADE,
            dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
            UNIQUE (sound_id, dataset_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_candidate_annotations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidate_annotations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sound_dataset_id INTEGER NOT NULL REFERENCES sound_datasets(id) ON DELETE CASCADE,
            taxonomy_node_id TEXT NOT NULL REFERENCES taxonomy_nodes(node_id),
            type TEXT NOT NULL DEFAULT 'UK',
            algorithm TEXT,
            start_time REAL,
            end_time REAL,
            ground_truth REAL,
            priority_score INTEGER NOT NULL DEFAULT 0,
            created_by TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_candidate_annotations_sound_node
        ON candidate_annotations (sound_dataset_id, taxonomy_node_id)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_votes_table(pool: &SqlitePool) -> Result<()> {
    // No (created_by, candidate) uniqueness: duplicate prevention is the
    // caller's contract so vote correction flows stay possible
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            candidate_annotation_id INTEGER NOT NULL
                REFERENCES candidate_annotations(id) ON DELETE CASCADE,
            created_by TEXT NOT NULL,
            vote REAL NOT NULL,
            from_expert INTEGER NOT NULL DEFAULT 0,
            test TEXT NOT NULL DEFAULT 'UN',
            from_task TEXT NOT NULL DEFAULT 'AD',
            visited_sound INTEGER,
            from_test_page INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_votes_candidate
        ON votes (candidate_annotation_id)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ground_truth_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ground_truth_annotations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sound_dataset_id INTEGER NOT NULL REFERENCES sound_datasets(id) ON DELETE CASCADE,
            taxonomy_node_id TEXT NOT NULL REFERENCES taxonomy_nodes(node_id),
            start_time REAL,
            end_time REAL,
            ground_truth REAL NOT NULL,
            from_propagation INTEGER NOT NULL DEFAULT 0,
            created_by TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (taxonomy_node_id, sound_dataset_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ground_truth_support (
            ground_truth_annotation_id INTEGER NOT NULL
                REFERENCES ground_truth_annotations(id) ON DELETE CASCADE,
            candidate_annotation_id INTEGER NOT NULL
                REFERENCES candidate_annotations(id) ON DELETE CASCADE,
            PRIMARY KEY (ground_truth_annotation_id, candidate_annotation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
