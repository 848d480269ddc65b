//! Shared bookkeeping for chunked batch jobs

use fsd_common::{Error, Result};
use serde::Serialize;

/// Outcome of a chunked batch job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Rows processed across all committed chunks
    pub processed: usize,
    /// Committed chunk transactions
    pub chunks: usize,
}

impl BatchReport {
    pub(crate) fn record_chunk(&mut self, rows: usize) {
        self.processed += rows;
        self.chunks += 1;
    }
}

pub(crate) fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("Batch chunk size must be greater than 0".to_string()));
    }
    Ok(())
}
