//! Vote submission
//!
//! [`CurationEngine::submit_vote`] is the single write path for votes: it
//! records the vote, recomputes the candidate's consensus, creates or
//! retracts ground truth and refreshes priority scores inside one
//! transaction.

use crate::batch::BatchReport;
use crate::consensus::ground_truth_state;
use crate::db::candidates::{get_candidate_annotation, lock_candidate_annotation, set_ground_truth};
use crate::ledger::{record_vote, votes_for, NewVote};
use crate::priority::{self, refresh_sound_dataset_scores};
use crate::propagation::{PropagationEngine, PropagationReport};
use crate::taxonomy::{store, TaxonomyGraph};
use fsd_common::config::DEFAULT_BATCH_CHUNK_SIZE;
use fsd_common::db::{Vote, VoteValue};
use fsd_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

/// What a submitted vote changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    pub vote: Vote,
    /// Consensus state of the candidate after the vote
    pub ground_truth: Option<VoteValue>,
    pub propagation: PropagationReport,
}

/// Entry point for vote submission and dataset-wide jobs
///
/// Cheap to clone; the taxonomy is shared read-only between clones.
#[derive(Debug, Clone)]
pub struct CurationEngine {
    pool: SqlitePool,
    taxonomy: Arc<TaxonomyGraph>,
    chunk_size: usize,
}

impl CurationEngine {
    pub fn new(pool: SqlitePool, taxonomy: Arc<TaxonomyGraph>) -> Self {
        Self {
            pool,
            taxonomy,
            chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
        }
    }

    /// Engine over the taxonomy stored in the database
    pub async fn load(pool: SqlitePool) -> Result<Self> {
        let taxonomy = store::load_taxonomy(&pool).await?;
        info!("Curation engine ready ({} taxonomy nodes)", taxonomy.num_nodes());
        Ok(Self::new(pool, Arc::new(taxonomy)))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn taxonomy(&self) -> &TaxonomyGraph {
        &self.taxonomy
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Record a vote and apply its consequences atomically
    ///
    /// The caller must check [`crate::ledger::vote_exists`] first; a second
    /// vote from the same user is stored like any other. Unknown candidates
    /// or nodes give `NotFound`; any other failure rolls the transaction
    /// back and is reported as `VoteNotRecorded`.
    pub async fn submit_vote(&self, new: NewVote) -> Result<VoteOutcome> {
        let candidate_annotation_id = new.candidate_annotation_id;
        self.apply_vote(&new)
            .await
            .map_err(|e| Error::vote_not_recorded(candidate_annotation_id, e))
    }

    async fn apply_vote(&self, new: &NewVote) -> Result<VoteOutcome> {
        let mut tx = self.pool.begin().await?;

        // Write lock first so the vote set read below includes every
        // vote committed for this candidate
        if !lock_candidate_annotation(&mut *tx, new.candidate_annotation_id).await? {
            return Err(Error::NotFound(format!(
                "Candidate annotation {}",
                new.candidate_annotation_id
            )));
        }
        let mut candidate = get_candidate_annotation(&mut *tx, new.candidate_annotation_id).await?;
        self.taxonomy.get_node(&candidate.taxonomy_node_id)?;

        let vote = record_vote(&mut *tx, new).await?;
        let votes = votes_for(&mut *tx, candidate.id).await?;
        let state = ground_truth_state(&votes);

        candidate.ground_truth = state.map(VoteValue::as_f64);
        set_ground_truth(&mut *tx, candidate.id, candidate.ground_truth).await?;

        let engine = PropagationEngine::new(&self.taxonomy);
        let propagation = match state {
            Some(value) if value.is_present() => engine.on_new_agreement(&mut *tx, &candidate, &vote).await?,
            Some(_) if vote.from_expert => engine.on_retraction(&mut *tx, &candidate, &vote).await?,
            _ => PropagationReport::default(),
        };

        refresh_sound_dataset_scores(&mut *tx, candidate.sound_dataset_id).await?;
        tx.commit().await?;

        debug!(
            vote_id = vote.id,
            candidate_annotation_id = candidate.id,
            node = %candidate.taxonomy_node_id,
            ground_truth = ?candidate.ground_truth,
            created = propagation.created.len(),
            deleted = propagation.deleted.len(),
            "Vote applied"
        );

        Ok(VoteOutcome {
            vote,
            ground_truth: state,
            propagation,
        })
    }

    /// Batch rescoring of a dataset with the configured chunk size
    pub async fn recompute_priority_scores(&self, dataset_id: i64) -> Result<BatchReport> {
        priority::recompute_priority_scores(&self.pool, dataset_id, self.chunk_size).await
    }
}
