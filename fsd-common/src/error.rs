//! Common error types for FSD curation

use thiserror::Error;

/// Common result type for FSD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across FSD crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, e.g. a malformed taxonomy file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found (unknown node id, candidate, dataset...)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The vote transaction was rolled back; nothing was persisted.
    ///
    /// Safe to retry as long as the caller keeps the one-vote-per-user
    /// precondition.
    #[error("Failed to record vote on candidate annotation {candidate_annotation_id}: {source}")]
    VoteNotRecorded {
        candidate_annotation_id: i64,
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a failure that happened inside the vote transaction
    pub fn vote_not_recorded(candidate_annotation_id: i64, source: Error) -> Self {
        match source {
            // Caller errors pass through unchanged
            Error::NotFound(_) | Error::InvalidInput(_) => source,
            other => Error::VoteNotRecorded {
                candidate_annotation_id,
                source: Box::new(other),
            },
        }
    }
}
