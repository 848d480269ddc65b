//! Administrative jobs over stored curation data

use crate::batch::{check_chunk_size, BatchReport};
use crate::db::candidates::{annotated_nodes, delete_candidate_annotation, unvoted_candidates};
use crate::db::datasets::get_dataset;
use crate::db::ground_truth::{direct_ground_truth_ids_page, get_ground_truth, refresh_all_node_counts};
use crate::ledger::transfer_votes;
use crate::propagation::PropagationEngine;
use crate::taxonomy::TaxonomyGraph;
use fsd_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Re-run propagation for every direct ground truth
///
/// Fills in ancestors added by a taxonomy update. Existing ancestor values
/// are left alone.
pub async fn propagate_all(pool: &SqlitePool, taxonomy: &TaxonomyGraph, chunk_size: usize) -> Result<BatchReport> {
    check_chunk_size(chunk_size)?;
    let engine = PropagationEngine::new(taxonomy);
    let mut report = BatchReport::default();
    let mut created = 0;
    let mut after_id = 0;

    loop {
        let mut tx = pool.begin().await?;
        let ids = direct_ground_truth_ids_page(&mut *tx, after_id, chunk_size).await?;
        let Some(&last_id) = ids.last() else {
            break;
        };

        for id in &ids {
            let Some(gt) = get_ground_truth(&mut *tx, *id).await? else {
                continue;
            };
            if !taxonomy.contains(&gt.taxonomy_node_id) {
                warn!("Skipping ground truth {} on unknown node {}", gt.id, gt.taxonomy_node_id);
                continue;
            }
            created += engine.propagate(&mut *tx, &gt, false).await?.created.len();
        }
        tx.commit().await?;

        report.record_chunk(ids.len());
        after_id = last_id;

        if ids.len() < chunk_size {
            break;
        }
    }

    info!(
        "Propagated {} ground truth annotations ({} created)",
        report.processed, created
    );
    Ok(report)
}

/// Recompute every node's ground truth counter
pub async fn refresh_all_ground_truth_counts(pool: &SqlitePool) -> Result<u64> {
    let mut conn = pool.acquire().await?;
    let nodes = refresh_all_node_counts(&mut conn).await?;
    info!("Refreshed ground truth counts of {} taxonomy nodes", nodes);
    Ok(nodes)
}

/// Delete unvoted candidates made redundant by a more specific label
///
/// A candidate on node X is redundant when the same sound also has a
/// candidate on a node that propagates to X, in this or any other dataset.
/// Only candidates of `dataset_id` are deleted, and those with votes are kept.
pub async fn remove_non_leaf_annotations(pool: &SqlitePool, taxonomy: &TaxonomyGraph, dataset_id: i64) -> Result<usize> {
    let mut tx = pool.begin().await?;
    get_dataset(&mut *tx, dataset_id).await?;

    let mut nodes_by_sound: HashMap<i64, HashSet<String>> = HashMap::new();
    for (sound_id, node_id) in annotated_nodes(&mut *tx, dataset_id).await? {
        nodes_by_sound.entry(sound_id).or_default().insert(node_id);
    }

    let mut removed = 0;
    for (candidate_id, sound_id, node_id) in unvoted_candidates(&mut *tx, dataset_id).await? {
        if !taxonomy.contains(&node_id) {
            continue;
        }
        let Some(annotated) = nodes_by_sound.get(&sound_id) else {
            continue;
        };

        let redundant = taxonomy
            .get_all_propagate_from_children(&node_id)?
            .iter()
            .any(|child| annotated.contains(&child.node_id));

        if redundant && delete_candidate_annotation(&mut *tx, candidate_id).await? {
            removed += 1;
        }
    }

    tx.commit().await?;
    info!("Removed {} non-leaf candidate annotations from dataset {}", removed, dataset_id);
    Ok(removed)
}

/// Reassign every vote of `from_user` to `to_user`
pub async fn transfer_user_votes(pool: &SqlitePool, from_user: &str, to_user: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let moved = transfer_votes(&mut *tx, from_user, to_user).await?;
    tx.commit().await?;

    info!("Transferred {} votes from {} to {}", moved, from_user, to_user);
    Ok(moved)
}

/// Per-node counts for one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub candidate_annotations: i64,
    pub ground_truth_annotations: i64,
    pub votes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub sounds: i64,
    pub candidate_annotations: i64,
    /// Non-propagated ground truth annotations
    pub ground_truth_annotations: i64,
    pub votes: i64,
    /// Only nodes with at least one candidate, by node id
    pub nodes: Vec<NodeStats>,
}

pub async fn dataset_stats(pool: &SqlitePool, dataset_id: i64) -> Result<DatasetStats> {
    let mut conn = pool.acquire().await?;
    get_dataset(&mut conn, dataset_id).await?;

    let totals = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM sound_datasets WHERE dataset_id = ?1) AS sounds,
            (SELECT COUNT(*) FROM candidate_annotations ca
             JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
             WHERE sd.dataset_id = ?1) AS candidates,
            (SELECT COUNT(*) FROM ground_truth_annotations g
             JOIN sound_datasets sd ON sd.id = g.sound_dataset_id
             WHERE sd.dataset_id = ?1 AND g.from_propagation = 0) AS ground_truth,
            (SELECT COUNT(*) FROM votes v
             JOIN candidate_annotations ca ON ca.id = v.candidate_annotation_id
             JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
             WHERE sd.dataset_id = ?1) AS votes
        "#,
    )
    .bind(dataset_id)
    .fetch_one(&mut *conn)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT ca.taxonomy_node_id,
               COUNT(*) AS candidates,
               (SELECT COUNT(*) FROM ground_truth_annotations g
                JOIN sound_datasets sd2 ON sd2.id = g.sound_dataset_id
                WHERE sd2.dataset_id = ?1 AND g.taxonomy_node_id = ca.taxonomy_node_id
                  AND g.from_propagation = 0) AS ground_truth,
               (SELECT COUNT(*) FROM votes v
                JOIN candidate_annotations ca2 ON ca2.id = v.candidate_annotation_id
                JOIN sound_datasets sd3 ON sd3.id = ca2.sound_dataset_id
                WHERE sd3.dataset_id = ?1 AND ca2.taxonomy_node_id = ca.taxonomy_node_id) AS votes
        FROM candidate_annotations ca
        JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
        WHERE sd.dataset_id = ?1
        GROUP BY ca.taxonomy_node_id
        ORDER BY ca.taxonomy_node_id
        "#,
    )
    .bind(dataset_id)
    .fetch_all(&mut *conn)
    .await?;

    let nodes = rows
        .iter()
        .map(|row| -> Result<NodeStats> {
            Ok(NodeStats {
                node_id: row.try_get("taxonomy_node_id")?,
                candidate_annotations: row.try_get("candidates")?,
                ground_truth_annotations: row.try_get("ground_truth")?,
                votes: row.try_get("votes")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DatasetStats {
        sounds: totals.try_get("sounds")?,
        candidate_annotations: totals.try_get("candidates")?,
        ground_truth_annotations: totals.try_get("ground_truth")?,
        votes: totals.try_get("votes")?,
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::candidates::{insert_candidate_annotation, NewCandidateAnnotation};
    use crate::db::datasets::{add_sound_to_dataset, insert_dataset};
    use crate::engine::CurationEngine;
    use crate::ledger::NewVote;
    use crate::test_support::{seed_candidate, Fixture};
    use fsd_common::db::VoteValue;

    #[tokio::test]
    async fn test_remove_non_leaf_annotations_keeps_voted() {
        let fixture = Fixture::advanced().await;
        let leaf = seed_candidate(&fixture, "3").await;
        let redundant = seed_candidate(&fixture, "5").await;
        let root = seed_candidate(&fixture, "1").await;
        let two = seed_candidate(&fixture, "2").await;
        let engine = CurationEngine::new(fixture.pool.clone(), fixture.taxonomy.clone());

        // Redundant through node 2, but voted on
        engine
            .submit_vote(NewVote::new("alice", root.id, VoteValue::Unsure))
            .await
            .unwrap();

        let removed = remove_non_leaf_annotations(&fixture.pool, &fixture.taxonomy, fixture.dataset_id)
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining: Vec<i64> = sqlx::query_scalar("SELECT id FROM candidate_annotations ORDER BY id")
            .fetch_all(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![leaf.id, root.id, two.id]);
        assert!(!remaining.contains(&redundant.id));
    }

    #[tokio::test]
    async fn test_remove_non_leaf_annotations_sees_other_datasets() {
        let fixture = Fixture::advanced().await;
        let redundant = seed_candidate(&fixture, "5").await;
        let mut conn = fixture.pool.acquire().await.unwrap();

        // The more specific label lives on the same sound in another dataset
        let other = insert_dataset(&mut conn, "fsd-extra", "Second dataset").await.unwrap();
        let membership = add_sound_to_dataset(&mut conn, fixture.sound_id, other.id).await.unwrap();
        let leaf = insert_candidate_annotation(&mut conn, &NewCandidateAnnotation::new(membership.id, "3"))
            .await
            .unwrap();
        drop(conn);

        let removed = remove_non_leaf_annotations(&fixture.pool, &fixture.taxonomy, fixture.dataset_id)
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining: Vec<i64> = sqlx::query_scalar("SELECT id FROM candidate_annotations ORDER BY id")
            .fetch_all(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![leaf.id]);
        assert!(!remaining.contains(&redundant.id));

        // Nothing left to remove in the other dataset
        let removed = remove_non_leaf_annotations(&fixture.pool, &fixture.taxonomy, other.id)
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_propagate_all_fills_missing_ancestors() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "3").await;
        let engine = CurationEngine::new(fixture.pool.clone(), fixture.taxonomy.clone());
        for user in ["a", "b"] {
            engine
                .submit_vote(NewVote::new(user, candidate.id, VoteValue::PresentPredominant))
                .await
                .unwrap();
        }

        // Simulate an ancestor that was added after the vote
        sqlx::query("DELETE FROM ground_truth_annotations WHERE taxonomy_node_id = '5'")
            .execute(&fixture.pool)
            .await
            .unwrap();

        let report = propagate_all(&fixture.pool, &fixture.taxonomy, 1).await.unwrap();
        assert_eq!(report.processed, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ground_truth_annotations WHERE taxonomy_node_id = '5'")
            .fetch_one(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(propagate_all(&fixture.pool, &fixture.taxonomy, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_counts_and_stats() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "4").await;
        let engine = CurationEngine::new(fixture.pool.clone(), fixture.taxonomy.clone());
        for user in ["a", "b"] {
            engine
                .submit_vote(NewVote::new(user, candidate.id, VoteValue::PresentNotPredominant))
                .await
                .unwrap();
        }

        sqlx::query("UPDATE taxonomy_nodes SET nb_ground_truth = 42")
            .execute(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(refresh_all_ground_truth_counts(&fixture.pool).await.unwrap(), 5);
        let counts: Vec<i64> = sqlx::query_scalar("SELECT nb_ground_truth FROM taxonomy_nodes ORDER BY node_id")
            .fetch_all(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(counts, vec![1, 0, 0, 1, 0]);

        let stats = dataset_stats(&fixture.pool, fixture.dataset_id).await.unwrap();
        assert_eq!(stats.sounds, 1);
        assert_eq!(stats.candidate_annotations, 1);
        assert_eq!(stats.ground_truth_annotations, 1);
        assert_eq!(stats.votes, 2);
        assert_eq!(
            stats.nodes,
            vec![NodeStats {
                node_id: "4".to_string(),
                candidate_annotations: 1,
                ground_truth_annotations: 1,
                votes: 2,
            }]
        );
    }

    #[tokio::test]
    async fn test_transfer_user_votes() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "4").await;
        let engine = CurationEngine::new(fixture.pool.clone(), fixture.taxonomy.clone());
        engine
            .submit_vote(NewVote::new("old", candidate.id, VoteValue::Unsure))
            .await
            .unwrap();

        assert_eq!(transfer_user_votes(&fixture.pool, "old", "new").await.unwrap(), 1);
        assert_eq!(transfer_user_votes(&fixture.pool, "old", "new").await.unwrap(), 0);
    }
}
