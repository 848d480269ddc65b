//! Candidate annotation persistence

use fsd_common::db::{AnnotationType, CandidateAnnotation};
use fsd_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

const CANDIDATE_COLUMNS: &str = r#"
    id, sound_dataset_id, taxonomy_node_id, type, algorithm, start_time, end_time,
    ground_truth, priority_score, created_by
"#;

/// Fields supplied when a sound is ingested with a label
#[derive(Debug, Clone)]
pub struct NewCandidateAnnotation {
    pub sound_dataset_id: i64,
    pub taxonomy_node_id: String,
    pub annotation_type: AnnotationType,
    pub algorithm: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub created_by: Option<String>,
}

impl NewCandidateAnnotation {
    pub fn new(sound_dataset_id: i64, taxonomy_node_id: impl Into<String>) -> Self {
        Self {
            sound_dataset_id,
            taxonomy_node_id: taxonomy_node_id.into(),
            annotation_type: AnnotationType::Automatic,
            algorithm: None,
            start_time: None,
            end_time: None,
            created_by: None,
        }
    }
}

pub async fn insert_candidate_annotation(
    conn: &mut SqliteConnection,
    new: &NewCandidateAnnotation,
) -> Result<CandidateAnnotation> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO candidate_annotations (
            sound_dataset_id, taxonomy_node_id, type, algorithm, start_time, end_time, created_by
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(new.sound_dataset_id)
    .bind(&new.taxonomy_node_id)
    .bind(new.annotation_type.as_str())
    .bind(&new.algorithm)
    .bind(new.start_time)
    .bind(new.end_time)
    .bind(&new.created_by)
    .fetch_one(&mut *conn)
    .await?;

    get_candidate_annotation(conn, id).await
}

pub async fn get_candidate_annotation(conn: &mut SqliteConnection, id: i64) -> Result<CandidateAnnotation> {
    let query = format!("SELECT {} FROM candidate_annotations WHERE id = ?", CANDIDATE_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Candidate annotation {}", id)))?;

    candidate_from_row(&row)
}

/// Candidates of one sound in one dataset
pub async fn candidates_for_sound_dataset(
    conn: &mut SqliteConnection,
    sound_dataset_id: i64,
) -> Result<Vec<CandidateAnnotation>> {
    let query = format!(
        "SELECT {} FROM candidate_annotations WHERE sound_dataset_id = ? ORDER BY id",
        CANDIDATE_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(sound_dataset_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(candidate_from_row).collect()
}

/// Take the write lock for a candidate before its votes are read
///
/// The no-op update is SQLite's equivalent of `SELECT ... FOR UPDATE`: once
/// it has run, concurrent vote transactions wait until this one commits, so
/// the read-modify-write of `ground_truth` observes every earlier vote.
/// Returns false when the candidate does not exist.
pub async fn lock_candidate_annotation(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE candidate_annotations SET id = id WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_ground_truth(conn: &mut SqliteConnection, id: i64, ground_truth: Option<f64>) -> Result<()> {
    sqlx::query("UPDATE candidate_annotations SET ground_truth = ? WHERE id = ?")
        .bind(ground_truth)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn set_priority_score(conn: &mut SqliteConnection, id: i64, score: i64) -> Result<()> {
    sqlx::query("UPDATE candidate_annotations SET priority_score = ? WHERE id = ?")
        .bind(score)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Keyset page of candidate ids in a dataset, skipping deleted sounds
pub async fn candidate_ids_page(
    conn: &mut SqliteConnection,
    dataset_id: i64,
    after_id: i64,
    limit: usize,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT ca.id
        FROM candidate_annotations ca
        JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
        JOIN sounds s ON s.id = sd.sound_id
        WHERE sd.dataset_id = ? AND ca.id > ? AND s.deleted_in_freesound = 0
        ORDER BY ca.id
        LIMIT ?
        "#,
    )
    .bind(dataset_id)
    .bind(after_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

/// `(id, sound_id, taxonomy_node_id)` of candidates in a dataset nobody voted on
pub async fn unvoted_candidates(conn: &mut SqliteConnection, dataset_id: i64) -> Result<Vec<(i64, i64, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT ca.id, sd.sound_id, ca.taxonomy_node_id
        FROM candidate_annotations ca
        JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
        WHERE sd.dataset_id = ?
          AND NOT EXISTS (SELECT 1 FROM votes v WHERE v.candidate_annotation_id = ca.id)
        ORDER BY ca.id
        "#,
    )
    .bind(dataset_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<(i64, i64, String)> {
            Ok((row.try_get("id")?, row.try_get("sound_id")?, row.try_get("taxonomy_node_id")?))
        })
        .collect()
}

/// Distinct `(sound_id, taxonomy_node_id)` pairs for the sounds of a dataset
///
/// Candidates of those sounds in any dataset are included.
pub async fn annotated_nodes(conn: &mut SqliteConnection, dataset_id: i64) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT sd.sound_id, ca.taxonomy_node_id
        FROM candidate_annotations ca
        JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
        WHERE sd.sound_id IN (SELECT sound_id FROM sound_datasets WHERE dataset_id = ?)
        "#,
    )
    .bind(dataset_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<(i64, String)> { Ok((row.try_get("sound_id")?, row.try_get("taxonomy_node_id")?)) })
        .collect()
}

pub async fn delete_candidate_annotation(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM candidate_annotations WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn candidate_from_row(row: &SqliteRow) -> Result<CandidateAnnotation> {
    let annotation_type: String = row.try_get("type")?;

    Ok(CandidateAnnotation {
        id: row.try_get("id")?,
        sound_dataset_id: row.try_get("sound_dataset_id")?,
        taxonomy_node_id: row.try_get("taxonomy_node_id")?,
        annotation_type: annotation_type.parse()?,
        algorithm: row.try_get("algorithm")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        ground_truth: row.try_get("ground_truth")?,
        priority_score: row.try_get("priority_score")?,
        created_by: row.try_get("created_by")?,
    })
}
