//! Test helpers for fsd-curation integration tests
//!
//! Each test gets its own on-disk database in a temporary directory so that
//! several pooled connections see the same data.

#![allow(dead_code)]

use fsd_common::db::{init_database, CandidateAnnotation};
use fsd_curation::db::candidates::{insert_candidate_annotation, NewCandidateAnnotation};
use fsd_curation::db::datasets::{add_sound_to_dataset, insert_dataset, insert_sound};
use fsd_curation::taxonomy::{parse_taxonomy_json, store};
use fsd_curation::CurationEngine;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// 1 -> {2, 4}, 2 -> 3, 5 -> 3; propagation 2->1, 3->5, 4->1
pub const ADVANCED_TAXONOMY: &str = r#"{
    "1": {"id": "1", "name": "Animal", "child_ids": ["2", "4"]},
    "2": {"id": "2", "name": "Domestic animals", "child_ids": ["3"], "propagate_to_parent_ids": ["1"]},
    "3": {"id": "3", "name": "Dog", "propagate_to_parent_ids": ["5"]},
    "4": {"id": "4", "name": "Wild animals", "propagate_to_parent_ids": ["1"]},
    "5": {"id": "5", "name": "Pets", "child_ids": ["3"], "restrictions": ["abstract"]}
}"#;

pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub engine: CurationEngine,
    pub dataset_id: i64,
}

impl TestDb {
    /// Fresh database with the advanced taxonomy and one empty dataset
    pub async fn advanced() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("fsd.db")).await.unwrap();

        store::save_taxonomy(&pool, &parse_taxonomy_json(ADVANCED_TAXONOMY).unwrap())
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let dataset = insert_dataset(&mut conn, "fsd", "Freesound Dataset").await.unwrap();
        drop(conn);

        let engine = CurationEngine::load(pool.clone()).await.unwrap();

        Self {
            _dir: dir,
            pool,
            engine,
            dataset_id: dataset.id,
        }
    }

    /// Add a sound to the dataset; returns the sound-in-dataset id
    pub async fn add_sound(&self, freesound_id: i64, duration: Option<f64>) -> i64 {
        let mut conn = self.pool.acquire().await.unwrap();
        let sound = insert_sound(&mut conn, freesound_id, "sound", duration).await.unwrap();
        add_sound_to_dataset(&mut conn, sound.id, self.dataset_id)
            .await
            .unwrap()
            .id
    }

    pub async fn add_candidate(&self, sound_dataset_id: i64, node_id: &str) -> CandidateAnnotation {
        let mut conn = self.pool.acquire().await.unwrap();
        insert_candidate_annotation(&mut conn, &NewCandidateAnnotation::new(sound_dataset_id, node_id))
            .await
            .unwrap()
    }

    /// Node ids holding a ground truth for a sound, with their propagation flag
    pub async fn ground_truth(&self, sound_dataset_id: i64) -> Vec<(String, bool)> {
        sqlx::query_as(
            r#"
            SELECT taxonomy_node_id, from_propagation
            FROM ground_truth_annotations
            WHERE sound_dataset_id = ?
            ORDER BY taxonomy_node_id
            "#,
        )
        .bind(sound_dataset_id)
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }

    pub async fn node_count(&self, node_id: &str) -> i64 {
        store::ground_truth_count(&self.pool, node_id).await.unwrap()
    }

    pub async fn priority_score(&self, candidate_id: i64) -> i64 {
        sqlx::query_scalar("SELECT priority_score FROM candidate_annotations WHERE id = ?")
            .bind(candidate_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
