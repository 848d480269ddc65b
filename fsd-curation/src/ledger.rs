//! Vote ledger
//!
//! Votes are append-only rows. The ledger does not enforce one vote per
//! (user, candidate): callers check [`vote_exists`] before recording, which
//! leaves room for vote correction flows outside the curation core.

use fsd_common::db::{Vote, VoteTask, VoteTest, VoteValue};
use fsd_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::debug;

const VOTE_COLUMNS: &str = r#"
    id, candidate_annotation_id, created_by, vote, from_expert, test, from_task,
    visited_sound, from_test_page, created_at
"#;

/// A vote about to be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct NewVote {
    pub created_by: String,
    pub candidate_annotation_id: i64,
    pub value: VoteValue,
    pub from_expert: bool,
    pub test: VoteTest,
    pub from_task: VoteTask,
    pub visited_sound: Option<bool>,
    pub from_test_page: bool,
}

impl NewVote {
    /// Non-expert vote from the advanced task with an unknown test state
    pub fn new(created_by: impl Into<String>, candidate_annotation_id: i64, value: VoteValue) -> Self {
        Self {
            created_by: created_by.into(),
            candidate_annotation_id,
            value,
            from_expert: false,
            test: VoteTest::Unknown,
            from_task: VoteTask::Advanced,
            visited_sound: None,
            from_test_page: false,
        }
    }

    pub fn expert(mut self) -> Self {
        self.from_expert = true;
        self
    }

    pub fn with_test(mut self, test: VoteTest) -> Self {
        self.test = test;
        self
    }

    pub fn with_task(mut self, task: VoteTask) -> Self {
        self.from_task = task;
        self
    }

    pub fn with_visited_sound(mut self, visited: bool) -> Self {
        self.visited_sound = Some(visited);
        self
    }

    pub fn from_test_page(mut self) -> Self {
        self.from_test_page = true;
        self
    }
}

/// Append a vote
pub async fn record_vote(conn: &mut SqliteConnection, new: &NewVote) -> Result<Vote> {
    let created_at = chrono::Utc::now().to_rfc3339();

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO votes (
            candidate_annotation_id, created_by, vote, from_expert, test, from_task,
            visited_sound, from_test_page, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(new.candidate_annotation_id)
    .bind(&new.created_by)
    .bind(new.value.as_f64())
    .bind(new.from_expert)
    .bind(new.test.as_str())
    .bind(new.from_task.as_str())
    .bind(new.visited_sound)
    .bind(new.from_test_page)
    .bind(&created_at)
    .fetch_one(&mut *conn)
    .await?;

    debug!(
        vote_id = id,
        candidate_annotation_id = new.candidate_annotation_id,
        user = %new.created_by,
        value = new.value.as_f64(),
        from_expert = new.from_expert,
        "Recorded vote"
    );

    Ok(Vote {
        id,
        candidate_annotation_id: new.candidate_annotation_id,
        created_by: new.created_by.clone(),
        value: new.value,
        from_expert: new.from_expert,
        test: new.test,
        from_task: new.from_task,
        visited_sound: new.visited_sound,
        from_test_page: new.from_test_page,
        created_at,
    })
}

/// Every vote on a candidate, oldest first
pub async fn votes_for(conn: &mut SqliteConnection, candidate_annotation_id: i64) -> Result<Vec<Vote>> {
    let query = format!(
        "SELECT {} FROM votes WHERE candidate_annotation_id = ? ORDER BY id",
        VOTE_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(candidate_annotation_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(vote_from_row).collect()
}

pub async fn count_by_value(
    conn: &mut SqliteConnection,
    candidate_annotation_id: i64,
    value: VoteValue,
    exclude_failed: bool,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM votes
        WHERE candidate_annotation_id = ? AND vote = ? AND (? = 0 OR test != ?)
        "#,
    )
    .bind(candidate_annotation_id)
    .bind(value.as_f64())
    .bind(exclude_failed)
    .bind(VoteTest::Failed.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

pub async fn vote_exists(conn: &mut SqliteConnection, created_by: &str, candidate_annotation_id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM votes WHERE created_by = ? AND candidate_annotation_id = ?)",
    )
    .bind(created_by)
    .bind(candidate_annotation_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Votes with a given value on all candidates of a node in a dataset
pub async fn count_by_value_for_node(
    conn: &mut SqliteConnection,
    dataset_id: i64,
    taxonomy_node_id: &str,
    value: VoteValue,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM votes v
        JOIN candidate_annotations ca ON ca.id = v.candidate_annotation_id
        JOIN sound_datasets sd ON sd.id = ca.sound_dataset_id
        WHERE sd.dataset_id = ? AND ca.taxonomy_node_id = ? AND v.vote = ?
        "#,
    )
    .bind(dataset_id)
    .bind(taxonomy_node_id)
    .bind(value.as_f64())
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Reassign every vote of one user to another; returns the number moved
pub async fn transfer_votes(conn: &mut SqliteConnection, from_user: &str, to_user: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE votes SET created_by = ? WHERE created_by = ?")
        .bind(to_user)
        .bind(from_user)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote> {
    let value: f64 = row.try_get("vote")?;
    let test: String = row.try_get("test")?;
    let from_task: String = row.try_get("from_task")?;

    Ok(Vote {
        id: row.try_get("id")?,
        candidate_annotation_id: row.try_get("candidate_annotation_id")?,
        created_by: row.try_get("created_by")?,
        value: VoteValue::from_f64(value)?,
        from_expert: row.try_get("from_expert")?,
        test: test.parse()?,
        from_task: from_task.parse()?,
        visited_sound: row.try_get("visited_sound")?,
        from_test_page: row.try_get("from_test_page")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Pool-backed handle over the ledger queries
#[derive(Debug, Clone)]
pub struct VoteLedger {
    pool: SqlitePool,
}

impl VoteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, new: &NewVote) -> Result<Vote> {
        let mut conn = self.pool.acquire().await?;
        record_vote(&mut conn, new).await
    }

    pub async fn votes_for(&self, candidate_annotation_id: i64) -> Result<Vec<Vote>> {
        let mut conn = self.pool.acquire().await?;
        votes_for(&mut conn, candidate_annotation_id).await
    }

    pub async fn count_by_value(&self, candidate_annotation_id: i64, value: VoteValue, exclude_failed: bool) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        count_by_value(&mut conn, candidate_annotation_id, value, exclude_failed).await
    }

    pub async fn exists(&self, created_by: &str, candidate_annotation_id: i64) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        vote_exists(&mut conn, created_by, candidate_annotation_id).await
    }

    pub async fn count_by_value_for_node(&self, dataset_id: i64, taxonomy_node_id: &str, value: VoteValue) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        count_by_value_for_node(&mut conn, dataset_id, taxonomy_node_id, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_candidate, Fixture};

    #[tokio::test]
    async fn test_record_and_read_back() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "3").await;
        let ledger = VoteLedger::new(fixture.pool.clone());

        let vote = ledger
            .record(&NewVote::new("alice", candidate.id, VoteValue::PresentPredominant).with_visited_sound(true))
            .await
            .unwrap();

        let votes = ledger.votes_for(candidate.id).await.unwrap();
        assert_eq!(votes, vec![vote]);
        assert_eq!(votes[0].test, VoteTest::Unknown);
        assert_eq!(votes[0].from_task, VoteTask::Advanced);
        assert_eq!(votes[0].visited_sound, Some(true));
        assert!(!votes[0].from_test_page);
    }

    #[tokio::test]
    async fn test_test_page_flag_is_stored() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "3").await;
        let ledger = VoteLedger::new(fixture.pool.clone());

        ledger
            .record(
                &NewVote::new("alice", candidate.id, VoteValue::NotPresent)
                    .with_test(VoteTest::Passed)
                    .from_test_page(),
            )
            .await
            .unwrap();

        let votes = ledger.votes_for(candidate.id).await.unwrap();
        assert!(votes[0].from_test_page);
        assert_eq!(votes[0].test, VoteTest::Passed);
    }

    #[tokio::test]
    async fn test_count_excludes_failed_votes() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "3").await;
        let ledger = VoteLedger::new(fixture.pool.clone());

        ledger.record(&NewVote::new("a", candidate.id, VoteValue::PresentPredominant)).await.unwrap();
        ledger
            .record(&NewVote::new("b", candidate.id, VoteValue::PresentPredominant).with_test(VoteTest::Failed))
            .await
            .unwrap();
        ledger.record(&NewVote::new("c", candidate.id, VoteValue::NotPresent)).await.unwrap();

        assert_eq!(ledger.count_by_value(candidate.id, VoteValue::PresentPredominant, true).await.unwrap(), 1);
        assert_eq!(ledger.count_by_value(candidate.id, VoteValue::PresentPredominant, false).await.unwrap(), 2);
        assert_eq!(ledger.count_by_value(candidate.id, VoteValue::Unsure, false).await.unwrap(), 0);
        assert_eq!(
            ledger
                .count_by_value_for_node(fixture.dataset_id, "3", VoteValue::NotPresent)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicates_are_the_callers_concern() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "3").await;
        let ledger = VoteLedger::new(fixture.pool.clone());

        assert!(!ledger.exists("alice", candidate.id).await.unwrap());
        ledger.record(&NewVote::new("alice", candidate.id, VoteValue::Unsure)).await.unwrap();
        assert!(ledger.exists("alice", candidate.id).await.unwrap());

        // A second vote from the same user is stored as-is
        ledger.record(&NewVote::new("alice", candidate.id, VoteValue::Unsure)).await.unwrap();
        assert_eq!(ledger.votes_for(candidate.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_votes() {
        let fixture = Fixture::advanced().await;
        let candidate = seed_candidate(&fixture, "3").await;
        let mut conn = fixture.pool.acquire().await.unwrap();

        record_vote(&mut conn, &NewVote::new("old", candidate.id, VoteValue::Unsure)).await.unwrap();
        assert_eq!(transfer_votes(&mut conn, "old", "new").await.unwrap(), 1);
        assert!(vote_exists(&mut conn, "new", candidate.id).await.unwrap());
        assert!(!vote_exists(&mut conn, "old", candidate.id).await.unwrap());
    }
}
