//! Datasets, sounds and sound-in-dataset membership
//!
//! Ingestion itself lives outside this crate; these are the persistence
//! entry points it calls.

use fsd_common::db::{Dataset, Sound, SoundDataset};
use fsd_common::{Error, Result};
use sqlx::{Row, SqliteConnection};

pub async fn insert_dataset(conn: &mut SqliteConnection, short_name: &str, name: &str) -> Result<Dataset> {
    let id: i64 = sqlx::query_scalar("INSERT INTO datasets (short_name, name) VALUES (?, ?) RETURNING id")
        .bind(short_name)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Dataset {
        id,
        short_name: short_name.to_string(),
        name: name.to_string(),
    })
}

pub async fn get_dataset(conn: &mut SqliteConnection, dataset_id: i64) -> Result<Dataset> {
    let row = sqlx::query("SELECT id, short_name, name FROM datasets WHERE id = ?")
        .bind(dataset_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Dataset {}", dataset_id)))?;

    Ok(Dataset {
        id: row.try_get("id")?,
        short_name: row.try_get("short_name")?,
        name: row.try_get("name")?,
    })
}

pub async fn get_dataset_by_short_name(conn: &mut SqliteConnection, short_name: &str) -> Result<Dataset> {
    let id: i64 = sqlx::query_scalar("SELECT id FROM datasets WHERE short_name = ?")
        .bind(short_name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Dataset '{}'", short_name)))?;

    get_dataset(conn, id).await
}

pub async fn insert_sound(
    conn: &mut SqliteConnection,
    freesound_id: i64,
    name: &str,
    duration: Option<f64>,
) -> Result<Sound> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO sounds (freesound_id, name, duration) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(freesound_id)
    .bind(name)
    .bind(duration)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Sound {
        id,
        freesound_id,
        name: name.to_string(),
        duration,
        deleted_in_freesound: false,
    })
}

pub async fn get_sound(conn: &mut SqliteConnection, sound_id: i64) -> Result<Sound> {
    let row = sqlx::query(
        "SELECT id, freesound_id, name, duration, deleted_in_freesound FROM sounds WHERE id = ?",
    )
    .bind(sound_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Sound {}", sound_id)))?;

    Ok(Sound {
        id: row.try_get("id")?,
        freesound_id: row.try_get("freesound_id")?,
        name: row.try_get("name")?,
        duration: row.try_get("duration")?,
        deleted_in_freesound: row.try_get("deleted_in_freesound")?,
    })
}

/// Record the outcome of an external deletion check
pub async fn mark_sound_deleted(conn: &mut SqliteConnection, sound_id: i64, deleted: bool) -> Result<()> {
    let result = sqlx::query("UPDATE sounds SET deleted_in_freesound = ? WHERE id = ?")
        .bind(deleted)
        .bind(sound_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Sound {}", sound_id)));
    }
    Ok(())
}

/// Add a sound to a dataset; returns the existing membership if present
pub async fn add_sound_to_dataset(
    conn: &mut SqliteConnection,
    sound_id: i64,
    dataset_id: i64,
) -> Result<SoundDataset> {
    sqlx::query("INSERT OR IGNORE INTO sound_datasets (sound_id, dataset_id) VALUES (?, ?)")
        .bind(sound_id)
        .bind(dataset_id)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM sound_datasets WHERE sound_id = ? AND dataset_id = ?")
        .bind(sound_id)
        .bind(dataset_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(SoundDataset { id, sound_id, dataset_id })
}
