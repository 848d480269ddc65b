//! Ground truth propagation along `propagate_to_parent` edges
//!
//! A ground truth on a (node, sound in dataset) pair is justified by its
//! support set: the candidate annotations whose consensus produced it,
//! directly or through a descendant. Propagation copies a ground truth to
//! every node in the propagate-to-parent closure and unions the support
//! sets; unpropagation removes a candidate from those support sets and
//! deletes ground truths left without support.
//!
//! Every operation runs on the caller's connection, normally the vote
//! transaction, so a failure leaves no partial state behind.

use crate::db::ground_truth::{
    add_support, delete_ground_truth, find_ground_truth, has_direct_support, insert_ground_truth,
    max_support_ground_truth, refresh_node_count, remove_support, support_ids, update_ground_truth,
    NewGroundTruth,
};
use crate::taxonomy::TaxonomyGraph;
use fsd_common::db::{CandidateAnnotation, GroundTruthAnnotation, Vote};
use fsd_common::{Error, Result};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::debug;

/// Nodes whose ground truth changed for one sound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl PropagationReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Nodes whose ground truth counter may have changed
    fn counted_nodes(&self) -> BTreeSet<&str> {
        self.created
            .iter()
            .chain(self.deleted.iter())
            .map(String::as_str)
            .collect()
    }
}

pub struct PropagationEngine<'a> {
    taxonomy: &'a TaxonomyGraph,
}

impl<'a> PropagationEngine<'a> {
    pub fn new(taxonomy: &'a TaxonomyGraph) -> Self {
        Self { taxonomy }
    }

    /// A candidate reached positive consensus (0.5 or 1)
    ///
    /// The candidate's own `ground_truth` must already be persisted.
    pub async fn on_new_agreement(
        &self,
        conn: &mut SqliteConnection,
        candidate: &CandidateAnnotation,
        vote: &Vote,
    ) -> Result<PropagationReport> {
        let value = candidate.ground_truth.ok_or_else(|| {
            Error::Internal(format!(
                "Candidate annotation {} has no consensus value",
                candidate.id
            ))
        })?;
        let mut report = PropagationReport::default();

        let existing =
            find_ground_truth(conn, &candidate.taxonomy_node_id, candidate.sound_dataset_id).await?;

        let gt = match existing {
            None => {
                let gt = insert_ground_truth(
                    conn,
                    &NewGroundTruth {
                        sound_dataset_id: candidate.sound_dataset_id,
                        taxonomy_node_id: &candidate.taxonomy_node_id,
                        start_time: candidate.start_time,
                        end_time: candidate.end_time,
                        ground_truth: value,
                        from_propagation: false,
                        created_by: Some(vote.created_by.as_str()),
                    },
                )
                .await?;
                add_support(conn, gt.id, &[candidate.id]).await?;
                report.created.push(gt.taxonomy_node_id.clone());

                debug!(
                    ground_truth_id = gt.id,
                    node = %gt.taxonomy_node_id,
                    sound_dataset_id = gt.sound_dataset_id,
                    value,
                    "Created ground truth"
                );
                gt
            }
            Some(mut gt) => {
                add_support(conn, gt.id, &[candidate.id]).await?;

                let mut changed = gt.from_propagation;
                gt.from_propagation = false;
                if vote.from_expert {
                    if let Some(max) = max_support_ground_truth(conn, gt.id).await? {
                        changed |= max != gt.ground_truth;
                        gt.ground_truth = max;
                    }
                }

                if changed {
                    update_ground_truth(conn, gt.id, gt.ground_truth, gt.from_propagation).await?;
                    report.updated.push(gt.taxonomy_node_id.clone());
                }
                gt
            }
        };

        self.propagate_into(conn, &gt, vote.from_expert, &mut report).await?;
        self.refresh_counts(conn, &report).await?;
        Ok(report)
    }

    /// Copy a ground truth and its support set to every propagate-to ancestor
    ///
    /// With `from_expert`, existing ancestor ground truths take the maximum
    /// value over their grown support set.
    pub async fn propagate(
        &self,
        conn: &mut SqliteConnection,
        gt: &GroundTruthAnnotation,
        from_expert: bool,
    ) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        self.propagate_into(conn, gt, from_expert, &mut report).await?;
        self.refresh_counts(conn, &report).await?;
        Ok(report)
    }

    /// An expert vote drove a candidate to 0 or -1
    ///
    /// The candidate is withdrawn from every ancestor support set and from
    /// its own node's ground truth. A ground truth still supported by other
    /// candidates survives and is marked as propagated unless one of those
    /// candidates sits on the same node.
    pub async fn on_retraction(
        &self,
        conn: &mut SqliteConnection,
        candidate: &CandidateAnnotation,
        vote: &Vote,
    ) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        if !vote.from_expert {
            return Ok(report);
        }

        let Some(gt) =
            find_ground_truth(conn, &candidate.taxonomy_node_id, candidate.sound_dataset_id).await?
        else {
            return Ok(report);
        };

        self.unpropagate_into(conn, &gt, candidate.id, &mut report).await?;

        remove_support(conn, gt.id, candidate.id).await?;
        match max_support_ground_truth(conn, gt.id).await? {
            None => {
                delete_ground_truth(conn, gt.id).await?;
                report.deleted.push(gt.taxonomy_node_id.clone());
            }
            Some(max) => {
                let from_propagation = !has_direct_support(conn, gt.id).await?;
                update_ground_truth(conn, gt.id, max, from_propagation).await?;
                report.updated.push(gt.taxonomy_node_id.clone());
            }
        }

        debug!(
            candidate_annotation_id = candidate.id,
            node = %gt.taxonomy_node_id,
            sound_dataset_id = gt.sound_dataset_id,
            deleted = report.deleted.len(),
            "Retracted ground truth"
        );

        self.refresh_counts(conn, &report).await?;
        Ok(report)
    }

    /// Remove `origin_candidate_id` from every ancestor support set
    ///
    /// Ancestor ground truths left with an empty support set are deleted.
    /// Surviving ancestors keep their current value even when it came from
    /// the withdrawn candidate. Only the retracted candidate's own ground
    /// truth is reset to the maximum of its remaining support, in
    /// [`Self::on_retraction`]. Ancestor values are revised by the next
    /// expert agreement that reaches them.
    pub async fn unpropagate(
        &self,
        conn: &mut SqliteConnection,
        gt: &GroundTruthAnnotation,
        origin_candidate_id: i64,
    ) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        self.unpropagate_into(conn, gt, origin_candidate_id, &mut report).await?;
        self.refresh_counts(conn, &report).await?;
        Ok(report)
    }

    async fn propagate_into(
        &self,
        conn: &mut SqliteConnection,
        gt: &GroundTruthAnnotation,
        from_expert: bool,
        report: &mut PropagationReport,
    ) -> Result<()> {
        let ancestors = self.taxonomy.get_all_propagate_to_parents(&gt.taxonomy_node_id)?;
        if ancestors.is_empty() {
            return Ok(());
        }
        let support = support_ids(conn, gt.id).await?;

        for ancestor in ancestors {
            match find_ground_truth(conn, &ancestor.node_id, gt.sound_dataset_id).await? {
                None => {
                    let created = insert_ground_truth(
                        conn,
                        &NewGroundTruth {
                            sound_dataset_id: gt.sound_dataset_id,
                            taxonomy_node_id: &ancestor.node_id,
                            start_time: gt.start_time,
                            end_time: gt.end_time,
                            ground_truth: gt.ground_truth,
                            from_propagation: true,
                            created_by: gt.created_by.as_deref(),
                        },
                    )
                    .await?;
                    add_support(conn, created.id, &support).await?;
                    report.created.push(ancestor.node_id.clone());
                }
                Some(existing) => {
                    add_support(conn, existing.id, &support).await?;
                    if from_expert {
                        if let Some(max) = max_support_ground_truth(conn, existing.id).await? {
                            update_ground_truth(conn, existing.id, max, existing.from_propagation).await?;
                            report.updated.push(ancestor.node_id.clone());
                        }
                    }
                }
            }
        }

        debug!(
            ground_truth_id = gt.id,
            node = %gt.taxonomy_node_id,
            sound_dataset_id = gt.sound_dataset_id,
            support = support.len(),
            created = report.created.len(),
            "Propagated ground truth"
        );
        Ok(())
    }

    async fn unpropagate_into(
        &self,
        conn: &mut SqliteConnection,
        gt: &GroundTruthAnnotation,
        origin_candidate_id: i64,
        report: &mut PropagationReport,
    ) -> Result<()> {
        for ancestor in self.taxonomy.get_all_propagate_to_parents(&gt.taxonomy_node_id)? {
            let Some(existing) = find_ground_truth(conn, &ancestor.node_id, gt.sound_dataset_id).await?
            else {
                continue;
            };

            remove_support(conn, existing.id, origin_candidate_id).await?;
            if support_ids(conn, existing.id).await?.is_empty() {
                delete_ground_truth(conn, existing.id).await?;
                report.deleted.push(ancestor.node_id.clone());
            }
        }

        Ok(())
    }

    async fn refresh_counts(&self, conn: &mut SqliteConnection, report: &PropagationReport) -> Result<()> {
        for node_id in report.counted_nodes() {
            refresh_node_count(conn, node_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::candidates::set_ground_truth;
    use crate::db::ground_truth::get_ground_truth;
    use crate::test_support::{seed_candidate, Fixture};
    use fsd_common::db::{VoteTask, VoteTest, VoteValue};

    fn vote(candidate: &CandidateAnnotation, from_expert: bool) -> Vote {
        Vote {
            id: 0,
            candidate_annotation_id: candidate.id,
            created_by: "curator".to_string(),
            value: VoteValue::PresentPredominant,
            from_expert,
            test: VoteTest::Passed,
            from_task: VoteTask::Advanced,
            visited_sound: None,
            from_test_page: false,
            created_at: String::new(),
        }
    }

    async fn agree(conn: &mut SqliteConnection, candidate: &mut CandidateAnnotation, value: f64) {
        set_ground_truth(conn, candidate.id, Some(value)).await.unwrap();
        candidate.ground_truth = Some(value);
    }

    #[tokio::test]
    async fn test_agreement_creates_and_propagates() {
        let fixture = Fixture::advanced().await;
        let mut candidate = seed_candidate(&fixture, "3").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut candidate, 1.0).await;
        let report = engine
            .on_new_agreement(&mut conn, &candidate, &vote(&candidate, false))
            .await
            .unwrap();
        assert_eq!(report.created, vec!["3", "5"]);

        let own = find_ground_truth(&mut conn, "3", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert!(!own.from_propagation);
        assert_eq!(own.created_by.as_deref(), Some("curator"));

        let parent = find_ground_truth(&mut conn, "5", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert!(parent.from_propagation);
        assert_eq!(support_ids(&mut conn, parent.id).await.unwrap(), vec![candidate.id]);

        for node in ["1", "2"] {
            assert!(find_ground_truth(&mut conn, node, fixture.sound_dataset_id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_repeated_agreement_does_not_duplicate() {
        let fixture = Fixture::advanced().await;
        let mut candidate = seed_candidate(&fixture, "4").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut candidate, 1.0).await;
        engine.on_new_agreement(&mut conn, &candidate, &vote(&candidate, false)).await.unwrap();
        let report = engine
            .on_new_agreement(&mut conn, &candidate, &vote(&candidate, false))
            .await
            .unwrap();
        assert!(report.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ground_truth_annotations")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_expert_agreement_takes_support_maximum() {
        let fixture = Fixture::advanced().await;
        let mut leaf = seed_candidate(&fixture, "3").await;
        let mut own = seed_candidate(&fixture, "5").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut leaf, 0.5).await;
        engine.on_new_agreement(&mut conn, &leaf, &vote(&leaf, false)).await.unwrap();

        agree(&mut conn, &mut own, 1.0).await;
        let report = engine.on_new_agreement(&mut conn, &own, &vote(&own, true)).await.unwrap();
        assert_eq!(report.updated, vec!["5"]);

        let gt = find_ground_truth(&mut conn, "5", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert!(!gt.from_propagation);
        assert_eq!(gt.ground_truth, 1.0);
        assert_eq!(support_ids(&mut conn, gt.id).await.unwrap(), vec![leaf.id, own.id]);
    }

    #[tokio::test]
    async fn test_retraction_keeps_shared_ancestor() {
        let fixture = Fixture::advanced().await;
        let mut two = seed_candidate(&fixture, "2").await;
        let mut four = seed_candidate(&fixture, "4").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut two, 1.0).await;
        engine.on_new_agreement(&mut conn, &two, &vote(&two, false)).await.unwrap();
        agree(&mut conn, &mut four, 1.0).await;
        engine.on_new_agreement(&mut conn, &four, &vote(&four, false)).await.unwrap();

        agree(&mut conn, &mut two, -1.0).await;
        let report = engine.on_retraction(&mut conn, &two, &vote(&two, true)).await.unwrap();
        assert_eq!(report.deleted, vec!["2"]);

        let root = find_ground_truth(&mut conn, "1", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert_eq!(support_ids(&mut conn, root.id).await.unwrap(), vec![four.id]);
        assert_eq!(refresh_node_count(&mut conn, "1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retraction_leaves_surviving_ancestor_value() {
        let fixture = Fixture::advanced().await;
        let mut two = seed_candidate(&fixture, "2").await;
        let mut four = seed_candidate(&fixture, "4").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut two, 0.5).await;
        engine.on_new_agreement(&mut conn, &two, &vote(&two, false)).await.unwrap();
        agree(&mut conn, &mut four, 1.0).await;
        engine.on_new_agreement(&mut conn, &four, &vote(&four, false)).await.unwrap();

        let root = find_ground_truth(&mut conn, "1", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert_eq!(root.ground_truth, 0.5);

        agree(&mut conn, &mut two, -1.0).await;
        engine.on_retraction(&mut conn, &two, &vote(&two, true)).await.unwrap();

        // The remaining supporter is at 1.0 but the ancestor is not recomputed
        let root = get_ground_truth(&mut conn, root.id).await.unwrap().unwrap();
        assert_eq!(root.ground_truth, 0.5);
        assert_eq!(support_ids(&mut conn, root.id).await.unwrap(), vec![four.id]);
        assert_eq!(max_support_ground_truth(&mut conn, root.id).await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn test_retraction_cleans_up_sole_support() {
        let fixture = Fixture::advanced().await;
        let mut four = seed_candidate(&fixture, "4").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut four, 1.0).await;
        engine.on_new_agreement(&mut conn, &four, &vote(&four, false)).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT nb_ground_truth FROM taxonomy_nodes WHERE node_id = '1'")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);

        agree(&mut conn, &mut four, 0.0).await;
        let report = engine.on_retraction(&mut conn, &four, &vote(&four, true)).await.unwrap();
        assert_eq!(report.deleted, vec!["1", "4"]);

        let count: i64 = sqlx::query_scalar("SELECT nb_ground_truth FROM taxonomy_nodes WHERE node_id = '1'")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_retraction_demotes_ground_truth_reached_from_child() {
        let fixture = Fixture::advanced().await;
        let mut leaf = seed_candidate(&fixture, "3").await;
        let mut own = seed_candidate(&fixture, "5").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut own, 1.0).await;
        engine.on_new_agreement(&mut conn, &own, &vote(&own, false)).await.unwrap();
        agree(&mut conn, &mut leaf, 0.5).await;
        engine.on_new_agreement(&mut conn, &leaf, &vote(&leaf, false)).await.unwrap();

        agree(&mut conn, &mut own, -1.0).await;
        let report = engine.on_retraction(&mut conn, &own, &vote(&own, true)).await.unwrap();
        assert!(report.deleted.is_empty());

        let gt = find_ground_truth(&mut conn, "5", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert!(gt.from_propagation);
        assert_eq!(gt.ground_truth, 0.5);
        assert_eq!(support_ids(&mut conn, gt.id).await.unwrap(), vec![leaf.id]);
    }

    #[tokio::test]
    async fn test_non_expert_retraction_is_ignored() {
        let fixture = Fixture::advanced().await;
        let mut four = seed_candidate(&fixture, "4").await;
        let mut conn = fixture.pool.acquire().await.unwrap();
        let engine = PropagationEngine::new(&fixture.taxonomy);

        agree(&mut conn, &mut four, 1.0).await;
        let created = engine.on_new_agreement(&mut conn, &four, &vote(&four, false)).await.unwrap();

        let report = engine.on_retraction(&mut conn, &four, &vote(&four, false)).await.unwrap();
        assert!(report.is_empty());
        let gt = find_ground_truth(&mut conn, "4", fixture.sound_dataset_id).await.unwrap().unwrap();
        assert!(get_ground_truth(&mut conn, gt.id).await.unwrap().is_some());
        assert_eq!(created.created.len(), 2);
    }
}
