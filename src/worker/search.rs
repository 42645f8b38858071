//! Single-range nonce search
//!
//! The hot loop encodes each candidate into a fixed scratch field, patches it
//! into the worker's private template, hashes the whole template and checks
//! the digest. Nothing in the loop allocates.

use super::{search_span, MinedBlock, SearchOutcome};
use crate::crypto::StreamingHash;
use crate::persist::write_mined_block;
use crate::types::{Digest, Nonce, NonceLayout, NonceRange};
use crate::{Result, Target, Template};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Candidates between checks of the stop flag and progress updates
pub const CHECK_INTERVAL: u64 = 1 << 16;

/// Worker scanning one nonce range
#[derive(Debug, Clone)]
pub struct SearchWorker<H: StreamingHash> {
    id: usize,
    range: NonceRange,
    layout: NonceLayout,
    target: Target,
    hasher: H,
    output: Option<PathBuf>,
    stop: Option<CancellationToken>,
    progress: Option<Arc<AtomicU64>>,
}

impl<H: StreamingHash> SearchWorker<H> {
    /// Create a worker, checking that its id fits the layout and the target
    /// fits the digest size
    pub fn new(
        id: usize,
        range: NonceRange,
        layout: NonceLayout,
        target: Target,
        hasher: H,
    ) -> Result<Self> {
        layout.check_worker(id)?;
        target.validate_for(hasher.output_size())?;

        Ok(Self {
            id,
            range,
            layout,
            target,
            hasher,
            output: None,
            stop: None,
            progress: None,
        })
    }

    /// Persist a winning block to `path`
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Stop early once `token` is cancelled, and cancel it on success
    pub fn with_stop(mut self, token: CancellationToken) -> Self {
        self.stop = Some(token);
        self
    }

    /// Publish the running hash count to a shared counter
    pub fn with_progress(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress = Some(counter);
        self
    }

    /// Worker identity
    pub fn id(&self) -> usize {
        self.id
    }

    /// Assigned nonce range
    pub fn range(&self) -> NonceRange {
        self.range
    }

    fn should_stop(&self) -> bool {
        self.stop.as_ref().is_some_and(|token| token.is_cancelled())
    }

    fn report_progress(&self, hashes: u64) {
        if let Some(counter) = &self.progress {
            counter.fetch_add(hashes, Ordering::Relaxed);
        }
    }

    /// Scan the range in increasing order, returning at the first valid digest.
    ///
    /// `template` must be this worker's own copy; it is left holding the last
    /// candidate tried.
    pub fn search(&self, template: &mut Template, offset: usize) -> Result<SearchOutcome> {
        let span = search_span(self.id, &self.range);
        let _enter = span.enter();

        // Fail before hashing anything if the field does not fit
        template.nonce_field(offset)?;

        let mut encoder = self.layout.encoder(self.id)?;
        let mut digest = Digest::zeroed(self.hasher.output_size())?;
        let mut hashes = 0u64;
        let mut unreported = 0u64;

        debug!("Worker {} searching {}", self.id, self.range);

        for nonce in self.range.iter() {
            if unreported == CHECK_INTERVAL {
                self.report_progress(unreported);
                unreported = 0;

                if self.should_stop() {
                    debug!("Worker {} stopped after {} hashes", self.id, hashes);
                    return Ok(self.outcome(hashes, None, true, None));
                }
            }

            template.patch(offset, encoder.encode(nonce))?;
            self.hasher.digest_into(template.bytes(), &mut digest)?;
            hashes += 1;
            unreported += 1;

            if self.target.meets_target(digest.as_bytes()) {
                self.report_progress(unreported);
                return Ok(self.found(nonce, digest, template, hashes));
            }
        }

        self.report_progress(unreported);
        debug!(
            "Worker {} exhausted {} without a valid digest",
            self.id, self.range
        );
        Ok(self.outcome(hashes, None, false, None))
    }

    fn found(&self, nonce: u64, digest: Digest, template: &Template, hashes: u64) -> SearchOutcome {
        info!(
            "Worker {} found valid digest {} with nonce {}",
            self.id, digest, nonce
        );

        if let Some(token) = &self.stop {
            token.cancel();
        }

        let block = MinedBlock {
            worker_id: self.id,
            nonce: Nonce::new(nonce),
            digest,
            bytes: template.bytes().to_vec(),
        };

        let persist_error = match &self.output {
            Some(path) => match write_mined_block(path, &block.bytes) {
                Ok(()) => {
                    info!("Mined block written to {}", path.display());
                    None
                }
                Err(e) => {
                    error!("Worker {} could not persist mined block: {}", self.id, e);
                    Some(e)
                }
            },
            None => None,
        };

        self.outcome(hashes, Some(block), false, persist_error)
    }

    fn outcome(
        &self,
        hashes: u64,
        block: Option<MinedBlock>,
        stopped: bool,
        persist_error: Option<crate::Error>,
    ) -> SearchOutcome {
        SearchOutcome {
            worker_id: self.id,
            range: self.range,
            hashes,
            block,
            stopped,
            persist_error,
        }
    }
}

/// Search `[start_nonce, start_nonce + trials)` as worker `worker_id`,
/// returning the winning block if one is found. Nothing is persisted.
pub fn search_range<H: StreamingHash>(
    hasher: H,
    target: Target,
    template: &mut Template,
    offset: usize,
    start_nonce: u64,
    trials: u64,
    worker_id: usize,
) -> Result<Option<MinedBlock>> {
    let range = NonceRange::new(start_nonce, trials)?;
    let layout = NonceLayout::for_workers(worker_id + 1)?;
    let worker = SearchWorker::new(worker_id, range, layout, target, hasher)?;
    Ok(worker.search(template, offset)?.block)
}
