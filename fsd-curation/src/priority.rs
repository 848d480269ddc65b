//! Priority scores for candidate annotations
//!
//! Scores order the annotation queue: sounds of a manageable length with
//! many confirming votes and other confirmed labels come first.

use crate::batch::{check_chunk_size, BatchReport};
use crate::db::candidates::{candidate_ids_page, candidates_for_sound_dataset, set_priority_score};
use crate::db::datasets::get_dataset;
use crate::db::ground_truth::count_other_direct_ground_truth;
use fsd_common::db::{VoteTest, VoteValue};
use fsd_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

/// Shortest sound (seconds) that gets a full score
pub const MIN_SCORED_DURATION: f64 = 0.3;
/// Longest sound (seconds) that gets a full score
pub const MAX_SCORED_DURATION: f64 = 30.0;

/// Everything [`score`] looks at for one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityInputs {
    pub duration: Option<f64>,
    /// Non-failed votes of value 1 or 0.5
    pub present_votes: i64,
    /// Non-propagated ground truths on the same sound for other nodes
    pub other_direct_ground_truth: i64,
}

/// 3 up to 10 s, 2 up to 20 s, 1 above
pub fn duration_bucket(duration: f64) -> i64 {
    if duration <= 10.0 {
        3
    } else if duration <= 20.0 {
        2
    } else {
        1
    }
}

pub fn score(inputs: &PriorityInputs) -> i64 {
    match inputs.duration {
        Some(d) if (MIN_SCORED_DURATION..=MAX_SCORED_DURATION).contains(&d) => {
            1000 * inputs.present_votes + 100 * duration_bucket(d) + inputs.other_direct_ground_truth
        }
        // Unknown duration scores like an out-of-range one
        _ => inputs.present_votes,
    }
}

pub async fn priority_inputs(conn: &mut SqliteConnection, candidate_annotation_id: i64) -> Result<PriorityInputs> {
    let row = sqlx::query(
        r#"
        SELECT s.duration, ca.sound_dataset_id, ca.taxonomy_node_id,
               (SELECT COUNT(*) FROM votes v
                WHERE v.candidate_annotation_id = ca.id
                  AND v.test != ? AND v.vote IN (?, ?)) AS present_votes
        FROM candidate_annotations ca
        JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
        JOIN sounds s ON s.id = sd.sound_id
        WHERE ca.id = ?
        "#,
    )
    .bind(VoteTest::Failed.as_str())
    .bind(VoteValue::PresentPredominant.as_f64())
    .bind(VoteValue::PresentNotPredominant.as_f64())
    .bind(candidate_annotation_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Candidate annotation {}", candidate_annotation_id)))?;

    let sound_dataset_id: i64 = row.try_get("sound_dataset_id")?;
    let taxonomy_node_id: String = row.try_get("taxonomy_node_id")?;

    Ok(PriorityInputs {
        duration: row.try_get("duration")?,
        present_votes: row.try_get("present_votes")?,
        other_direct_ground_truth: count_other_direct_ground_truth(conn, sound_dataset_id, &taxonomy_node_id)
            .await?,
    })
}

/// Recompute and persist one candidate's score
pub async fn refresh_candidate_score(conn: &mut SqliteConnection, candidate_annotation_id: i64) -> Result<i64> {
    let inputs = priority_inputs(conn, candidate_annotation_id).await?;
    let score = score(&inputs);
    set_priority_score(conn, candidate_annotation_id, score).await?;
    Ok(score)
}

/// Rescore every candidate of a sound in a dataset
///
/// A new or removed ground truth on one node changes the score of the
/// sound's other candidates, so votes refresh the whole sound.
pub async fn refresh_sound_dataset_scores(conn: &mut SqliteConnection, sound_dataset_id: i64) -> Result<usize> {
    let candidates = candidates_for_sound_dataset(conn, sound_dataset_id).await?;
    for candidate in &candidates {
        refresh_candidate_score(conn, candidate.id).await?;
    }

    debug!(sound_dataset_id, candidates = candidates.len(), "Refreshed priority scores");
    Ok(candidates.len())
}

/// Rescore all candidates of a dataset, one transaction per chunk
///
/// Sounds deleted upstream are skipped. Chunks committed before a failure
/// stay committed.
pub async fn recompute_priority_scores(pool: &SqlitePool, dataset_id: i64, chunk_size: usize) -> Result<BatchReport> {
    check_chunk_size(chunk_size)?;
    {
        let mut conn = pool.acquire().await?;
        get_dataset(&mut conn, dataset_id).await?;
    }

    let mut report = BatchReport::default();
    let mut after_id = 0;

    loop {
        let mut tx = pool.begin().await?;
        let ids = candidate_ids_page(&mut *tx, dataset_id, after_id, chunk_size).await?;
        let Some(&last_id) = ids.last() else {
            break;
        };

        for id in &ids {
            refresh_candidate_score(&mut *tx, *id).await?;
        }
        tx.commit().await?;

        report.record_chunk(ids.len());
        after_id = last_id;
        info!(dataset_id, processed = report.processed, "Priority score chunk committed");

        if ids.len() < chunk_size {
            break;
        }
    }

    info!(
        "Recomputed priority scores for dataset {}: {} candidates in {} chunks",
        dataset_id, report.processed, report.chunks
    );
    Ok(report)
}
