//! Database access for the curation tables
//!
//! Functions take `&mut SqliteConnection` so the same query can run on a
//! pooled connection or inside a vote transaction (`&mut *tx`).

pub mod candidates;
pub mod datasets;
pub mod ground_truth;
