//! Nonce search workers
//!
//! A [`SearchWorker`] scans one contiguous nonce range over its own private
//! copy of the template. A [`MinerPool`] partitions the nonce space, runs one
//! worker per partition on its own OS thread and joins them all.

use crate::crypto::StreamingHash;
use crate::types::{Digest, Nonce, NonceRange};
use crate::{Error, Result, Target};
use tracing::Span;

pub mod pool;
pub mod search;

pub use pool::{partition, random_start_nonce, MinerPool, PoolConfig, PoolReport, MAX_WORKERS};
pub use search::{search_range, SearchWorker};

/// Template state at the moment a worker found a valid digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedBlock {
    /// Worker that found the block
    pub worker_id: usize,
    /// Winning nonce
    pub nonce: Nonce,
    /// Digest of the patched template
    pub digest: Digest,
    /// The full patched template
    pub bytes: Vec<u8>,
}

impl MinedBlock {
    /// Re-hash the block and check it against `target`
    pub fn verify<H: StreamingHash>(&self, hasher: &H, target: &Target) -> Result<bool> {
        let digest = hasher.digest(&self.bytes)?;
        Ok(digest == self.digest && target.meets_target(digest.as_bytes()))
    }
}

/// Result of one worker scanning its range
#[derive(Debug)]
pub struct SearchOutcome {
    /// Worker identity
    pub worker_id: usize,
    /// Range the worker was assigned
    pub range: NonceRange,
    /// Number of digests actually computed
    pub hashes: u64,
    /// Winning block, if any
    pub block: Option<MinedBlock>,
    /// Whether the worker stopped early because another worker succeeded
    pub stopped: bool,
    /// Failure to write the winning block to disk
    pub persist_error: Option<Error>,
}

impl SearchOutcome {
    /// Whether this worker found a valid digest
    pub fn found(&self) -> bool {
        self.block.is_some()
    }
}

/// Create a tracing span for one worker's search
pub fn search_span(worker_id: usize, range: &NonceRange) -> Span {
    tracing::info_span!(
        "search",
        worker_id = worker_id,
        start = range.start(),
        trials = range.len(),
    )
}
