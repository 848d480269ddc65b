//! fsd-curation library - consensus and ground truth propagation
//!
//! Turns crowd votes on candidate annotations into ground truth labels for a
//! sound dataset and keeps the labels consistent with a multi-parent
//! taxonomy:
//! - [`taxonomy`]: the category graph and its closure queries
//! - [`ledger`]: vote storage
//! - [`consensus`]: vote set to ground truth state
//! - [`propagation`]: ground truth creation, propagation and retraction
//! - [`priority`]: annotation queue ordering
//! - [`engine`]: the transactional vote entry point
//! - [`maintenance`]: administrative batch jobs

pub mod batch;
pub mod consensus;
pub mod db;
pub mod engine;
pub mod ledger;
pub mod maintenance;
pub mod priority;
pub mod propagation;
pub mod taxonomy;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::BatchReport;
pub use consensus::ground_truth_state;
pub use engine::{CurationEngine, VoteOutcome};
pub use ledger::{NewVote, VoteLedger};
pub use propagation::{PropagationEngine, PropagationReport};
pub use taxonomy::TaxonomyGraph;
