//! Shared fixtures for unit tests

use crate::db::candidates::{insert_candidate_annotation, NewCandidateAnnotation};
use crate::db::datasets::{add_sound_to_dataset, insert_dataset, insert_sound};
use crate::taxonomy::{parse_taxonomy_json, store, TaxonomyGraph};
use fsd_common::db::{open_in_memory, CandidateAnnotation};
use sqlx::SqlitePool;
use std::sync::Arc;

/// 1 -> {2, 4}, 2 -> 3, 5 -> 3; propagation 2->1, 3->5, 4->1
pub const ADVANCED_TAXONOMY: &str = r#"{
    "1": {"id": "1", "name": "1", "child_ids": ["2", "4"]},
    "2": {"id": "2", "name": "2", "child_ids": ["3"], "propagate_to_parent_ids": ["1"]},
    "3": {"id": "3", "name": "3", "propagate_to_parent_ids": ["5"]},
    "4": {"id": "4", "name": "4", "propagate_to_parent_ids": ["1"]},
    "5": {"id": "5", "name": "5", "child_ids": ["3"]}
}"#;

/// In-memory database with the advanced taxonomy and one 5 s sound
pub struct Fixture {
    pub pool: SqlitePool,
    pub taxonomy: Arc<TaxonomyGraph>,
    pub dataset_id: i64,
    pub sound_id: i64,
    pub sound_dataset_id: i64,
}

impl Fixture {
    pub async fn advanced() -> Self {
        let pool = open_in_memory().await.unwrap();
        store::save_taxonomy(&pool, &parse_taxonomy_json(ADVANCED_TAXONOMY).unwrap())
            .await
            .unwrap();
        let taxonomy = Arc::new(store::load_taxonomy(&pool).await.unwrap());

        let mut conn = pool.acquire().await.unwrap();
        let dataset = insert_dataset(&mut conn, "fsd", "Freesound Dataset").await.unwrap();
        let sound = insert_sound(&mut conn, 1234, "test sound", Some(5.0)).await.unwrap();
        let sound_dataset = add_sound_to_dataset(&mut conn, sound.id, dataset.id).await.unwrap();
        drop(conn);

        Self {
            pool,
            taxonomy,
            dataset_id: dataset.id,
            sound_id: sound.id,
            sound_dataset_id: sound_dataset.id,
        }
    }
}

/// Candidate on `node_id` for the fixture's sound
pub async fn seed_candidate(fixture: &Fixture, node_id: &str) -> CandidateAnnotation {
    let mut conn = fixture.pool.acquire().await.unwrap();
    insert_candidate_annotation(&mut conn, &NewCandidateAnnotation::new(fixture.sound_dataset_id, node_id))
        .await
        .unwrap()
}
