//! Ground truth annotations, their support sets and node counters

use fsd_common::db::GroundTruthAnnotation;
use fsd_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

/// Fields of a ground truth annotation about to be created
#[derive(Debug, Clone)]
pub struct NewGroundTruth<'a> {
    pub sound_dataset_id: i64,
    pub taxonomy_node_id: &'a str,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub ground_truth: f64,
    pub from_propagation: bool,
    pub created_by: Option<&'a str>,
}

/// The ground truth for a (node, sound in dataset) pair, if any
pub async fn find_ground_truth(
    conn: &mut SqliteConnection,
    taxonomy_node_id: &str,
    sound_dataset_id: i64,
) -> Result<Option<GroundTruthAnnotation>> {
    let row = sqlx::query(
        r#"
        SELECT id, sound_dataset_id, taxonomy_node_id, start_time, end_time,
               ground_truth, from_propagation, created_by
        FROM ground_truth_annotations
        WHERE taxonomy_node_id = ? AND sound_dataset_id = ?
        "#,
    )
    .bind(taxonomy_node_id)
    .bind(sound_dataset_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(ground_truth_from_row).transpose()
}

/// Insert a ground truth annotation
///
/// Plain INSERT on purpose: a second row for the same pair violates the
/// UNIQUE constraint and aborts the surrounding transaction.
pub async fn insert_ground_truth(
    conn: &mut SqliteConnection,
    new: &NewGroundTruth<'_>,
) -> Result<GroundTruthAnnotation> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO ground_truth_annotations (
            sound_dataset_id, taxonomy_node_id, start_time, end_time,
            ground_truth, from_propagation, created_by
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(new.sound_dataset_id)
    .bind(new.taxonomy_node_id)
    .bind(new.start_time)
    .bind(new.end_time)
    .bind(new.ground_truth)
    .bind(new.from_propagation)
    .bind(new.created_by)
    .fetch_one(&mut *conn)
    .await?;

    Ok(GroundTruthAnnotation {
        id,
        sound_dataset_id: new.sound_dataset_id,
        taxonomy_node_id: new.taxonomy_node_id.to_string(),
        start_time: new.start_time,
        end_time: new.end_time,
        ground_truth: new.ground_truth,
        from_propagation: new.from_propagation,
        created_by: new.created_by.map(str::to_string),
    })
}

pub async fn update_ground_truth(
    conn: &mut SqliteConnection,
    id: i64,
    ground_truth: f64,
    from_propagation: bool,
) -> Result<()> {
    sqlx::query("UPDATE ground_truth_annotations SET ground_truth = ?, from_propagation = ? WHERE id = ?")
        .bind(ground_truth)
        .bind(from_propagation)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Delete a ground truth annotation; its support links cascade
pub async fn delete_ground_truth(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM ground_truth_annotations WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Candidate annotations currently justifying a ground truth
pub async fn support_ids(conn: &mut SqliteConnection, ground_truth_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT candidate_annotation_id
        FROM ground_truth_support
        WHERE ground_truth_annotation_id = ?
        ORDER BY candidate_annotation_id
        "#,
    )
    .bind(ground_truth_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

/// Add candidates to a support set (already present ones are ignored)
pub async fn add_support(
    conn: &mut SqliteConnection,
    ground_truth_id: i64,
    candidate_ids: &[i64],
) -> Result<()> {
    for candidate_id in candidate_ids {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO ground_truth_support (ground_truth_annotation_id, candidate_annotation_id)
            VALUES (?, ?)
            "#,
        )
        .bind(ground_truth_id)
        .bind(candidate_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Remove one candidate from a support set; returns whether it was there
pub async fn remove_support(
    conn: &mut SqliteConnection,
    ground_truth_id: i64,
    candidate_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM ground_truth_support WHERE ground_truth_annotation_id = ? AND candidate_annotation_id = ?",
    )
    .bind(ground_truth_id)
    .bind(candidate_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Highest consensus value among the supporting candidates
pub async fn max_support_ground_truth(conn: &mut SqliteConnection, ground_truth_id: i64) -> Result<Option<f64>> {
    let max = sqlx::query_scalar(
        r#"
        SELECT MAX(ca.ground_truth)
        FROM ground_truth_support s
        JOIN candidate_annotations ca ON ca.id = s.candidate_annotation_id
        WHERE s.ground_truth_annotation_id = ?
        "#,
    )
    .bind(ground_truth_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(max)
}

/// Whether any supporting candidate is annotated on the ground truth's own node
pub async fn has_direct_support(conn: &mut SqliteConnection, ground_truth_id: i64) -> Result<bool> {
    let direct = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM ground_truth_support s
            JOIN ground_truth_annotations g ON g.id = s.ground_truth_annotation_id
            JOIN candidate_annotations ca ON ca.id = s.candidate_annotation_id
            WHERE s.ground_truth_annotation_id = ? AND ca.taxonomy_node_id = g.taxonomy_node_id
        )
        "#,
    )
    .bind(ground_truth_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(direct)
}

/// Non-propagated ground truths of the same sound for other nodes
pub async fn count_other_direct_ground_truth(
    conn: &mut SqliteConnection,
    sound_dataset_id: i64,
    taxonomy_node_id: &str,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM ground_truth_annotations
        WHERE sound_dataset_id = ? AND taxonomy_node_id != ? AND from_propagation = 0
        "#,
    )
    .bind(sound_dataset_id)
    .bind(taxonomy_node_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Direct (non-propagated) ground truth ids after `after_id`, for batch jobs
pub async fn direct_ground_truth_ids_page(
    conn: &mut SqliteConnection,
    after_id: i64,
    limit: usize,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT id FROM ground_truth_annotations
        WHERE from_propagation = 0 AND id > ?
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(after_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

pub async fn get_ground_truth(conn: &mut SqliteConnection, id: i64) -> Result<Option<GroundTruthAnnotation>> {
    let row = sqlx::query(
        r#"
        SELECT id, sound_dataset_id, taxonomy_node_id, start_time, end_time,
               ground_truth, from_propagation, created_by
        FROM ground_truth_annotations
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(ground_truth_from_row).transpose()
}

/// Recompute and persist a node's cached ground truth counter
pub async fn refresh_node_count(conn: &mut SqliteConnection, taxonomy_node_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        UPDATE taxonomy_nodes
        SET nb_ground_truth = (
            SELECT COUNT(*) FROM ground_truth_annotations WHERE taxonomy_node_id = taxonomy_nodes.node_id
        )
        WHERE node_id = ?
        RETURNING nb_ground_truth
        "#,
    )
    .bind(taxonomy_node_id)
    .fetch_optional(&mut *conn)
    .await?
    .unwrap_or(0);

    Ok(count)
}

/// Recompute every node counter in one statement
pub async fn refresh_all_node_counts(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE taxonomy_nodes
        SET nb_ground_truth = (
            SELECT COUNT(*) FROM ground_truth_annotations WHERE taxonomy_node_id = taxonomy_nodes.node_id
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn ground_truth_from_row(row: &SqliteRow) -> Result<GroundTruthAnnotation> {
    Ok(GroundTruthAnnotation {
        id: row.try_get("id")?,
        sound_dataset_id: row.try_get("sound_dataset_id")?,
        taxonomy_node_id: row.try_get("taxonomy_node_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        ground_truth: row.try_get("ground_truth")?,
        from_propagation: row.try_get("from_propagation")?,
        created_by: row.try_get("created_by")?,
    })
}
