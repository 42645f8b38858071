//! Fixed worker pool over a partitioned nonce space
//!
//! The nonce space `[start, start + trials * workers)` is cut into one
//! contiguous range per worker. Each worker runs on a blocking OS thread with
//! its own template copy and hasher; joining them is the only synchronization.

use super::{SearchOutcome, SearchWorker};
use crate::crypto::StreamingHash;
use crate::types::{HashRate, NonceLayout, NonceRange};
use crate::{Error, MinedBlock, Result, Target, Template};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest pool; tokio's blocking pool runs at most 512 threads at once
pub const MAX_WORKERS: usize = 512;

/// Split `trials_per_worker * workers` nonces starting at `start` into
/// consecutive, disjoint ranges
pub fn partition(start: u64, trials_per_worker: u64, workers: usize) -> Result<Vec<NonceRange>> {
    if workers == 0 {
        return Err(Error::config("Worker count must be greater than 0"));
    }

    total_trials(trials_per_worker, workers)
        .and_then(|total| start.checked_add(total))
        .ok_or_else(|| {
            Error::nonce(format!(
                "{} workers x {} trials starting at {} overflows the 64-bit nonce space",
                workers, trials_per_worker, start
            ))
        })?;

    (0..workers as u64)
        .map(|i| NonceRange::new(start + trials_per_worker * i, trials_per_worker))
        .collect()
}

fn total_trials(trials_per_worker: u64, workers: usize) -> Option<u64> {
    trials_per_worker.checked_mul(workers as u64)
}

/// Random start nonce leaving room for the whole partitioned space
pub fn random_start_nonce(trials_per_worker: u64, workers: usize) -> Result<u64> {
    let total = total_trials(trials_per_worker, workers).ok_or_else(|| {
        Error::nonce(format!(
            "{} workers x {} trials exceeds the 64-bit nonce space",
            workers, trials_per_worker
        ))
    })?;

    Ok(rand::rng().random_range(0..=u64::MAX - total))
}

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers, one OS thread each
    pub workers: usize,
    /// Nonces assigned to each worker
    pub trials_per_worker: u64,
    /// First nonce of worker 0
    pub start_nonce: u64,
    /// Difficulty rule
    pub target: Target,
    /// Where winning blocks are written, if anywhere
    pub output: Option<PathBuf>,
    /// Stop all workers once one succeeds
    pub stop_on_first: bool,
    /// How often aggregate progress is logged; zero disables it
    pub progress_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().min(MAX_WORKERS),
            trials_per_worker: 1_000_000_000,
            start_nonce: 0,
            target: Target::default(),
            output: None,
            stop_on_first: false,
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Result of a full pool run
#[derive(Debug)]
pub struct PoolReport {
    /// Per-worker outcomes, ordered by worker id
    pub outcomes: Vec<SearchOutcome>,
    /// Nonces assigned to each worker
    pub trials_per_worker: u64,
    /// Wall-clock time from spawn to the last join
    pub elapsed: Duration,
}

impl PoolReport {
    /// Blocks found by any worker
    pub fn winners(&self) -> impl Iterator<Item = &MinedBlock> {
        self.outcomes.iter().filter_map(|outcome| outcome.block.as_ref())
    }

    /// Whether at least one winning block reached the output
    pub fn persisted(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.found() && outcome.persist_error.is_none())
    }

    /// Number of workers that ran
    pub fn workers(&self) -> usize {
        self.outcomes.len()
    }

    /// Total nonces assigned across the pool
    pub fn total_trials(&self) -> u64 {
        self.trials_per_worker.saturating_mul(self.outcomes.len() as u64)
    }

    /// Digests actually computed across the pool
    pub fn hashes_computed(&self) -> u64 {
        self.outcomes.iter().map(|outcome| outcome.hashes).sum()
    }

    /// Aggregate rate over assigned trials, `trials_per_worker * workers / elapsed`
    pub fn hash_rate(&self) -> HashRate {
        HashRate::from_hashes(self.total_trials(), self.elapsed)
    }

    /// Aggregate rate over digests actually computed
    pub fn measured_hash_rate(&self) -> HashRate {
        HashRate::from_hashes(self.hashes_computed(), self.elapsed)
    }
}

/// Pool of search workers sharing one template and offset
#[derive(Debug)]
pub struct MinerPool<H: StreamingHash> {
    config: PoolConfig,
    hasher: H,
    layout: NonceLayout,
    ranges: Vec<NonceRange>,
}

impl<H: StreamingHash> MinerPool<H> {
    /// Create a pool, partitioning the nonce space up front
    pub fn new(config: PoolConfig, hasher: H) -> Result<Self> {
        if config.workers > MAX_WORKERS {
            return Err(Error::config(format!(
                "{} workers requested, at most {} can run at once",
                config.workers, MAX_WORKERS
            )));
        }

        let ranges = partition(config.start_nonce, config.trials_per_worker, config.workers)?;
        let layout = NonceLayout::for_workers(config.workers)?;
        config.target.validate_for(hasher.output_size())?;

        info!(
            "Creating pool of {} {} workers, {} trials each, tag width {}",
            config.workers,
            hasher.name(),
            config.trials_per_worker,
            layout.tag_width()
        );

        Ok(Self {
            config,
            hasher,
            layout,
            ranges,
        })
    }

    /// Nonce range of every worker, indexed by worker id
    pub fn ranges(&self) -> &[NonceRange] {
        &self.ranges
    }

    /// Nonce field layout shared by the workers
    pub fn layout(&self) -> NonceLayout {
        self.layout
    }

    /// Run every worker to completion and join them
    pub async fn run(&self, template: &Template, offset: usize) -> Result<PoolReport> {
        // A bad offset aborts the run before any worker starts
        template.nonce_field(offset)?;

        let stop = self.config.stop_on_first.then(CancellationToken::new);
        let progress = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        let mut handles = Vec::with_capacity(self.ranges.len());
        for (worker_id, range) in self.ranges.iter().enumerate() {
            let mut worker = SearchWorker::new(
                worker_id,
                *range,
                self.layout,
                self.config.target,
                self.hasher.clone(),
            )?
            .with_progress(Arc::clone(&progress));

            if let Some(output) = &self.config.output {
                worker = worker.with_output(output.clone());
            }
            if let Some(token) = &stop {
                worker = worker.with_stop(token.clone());
            }

            debug!("Spawning worker {} over {}", worker_id, range);
            let mut buffer = template.clone();
            handles.push(task::spawn_blocking(move || worker.search(&mut buffer, offset)));
        }

        let reporter_done = CancellationToken::new();
        let reporter = self.spawn_progress_reporter(Arc::clone(&progress), reporter_done.clone());

        let results = futures::future::join_all(handles).await;
        let elapsed = started.elapsed();

        reporter_done.cancel();
        if let Some(handle) = reporter {
            let _ = handle.await;
        }

        let mut outcomes = Vec::with_capacity(results.len());
        let mut failure = None;
        for (worker_id, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(outcome)) => {
                    debug!(
                        "Worker {} finished after {} hashes (found: {})",
                        worker_id,
                        outcome.hashes,
                        outcome.found()
                    );
                    outcomes.push(outcome);
                }
                Ok(Err(e)) => {
                    error!(category = e.category(), "Worker {} failed: {}", worker_id, e);
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    let e = Error::worker(worker_id, format!("panicked or was cancelled: {}", e));
                    error!(category = e.category(), "{}", e);
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let report = PoolReport {
            outcomes,
            trials_per_worker: self.config.trials_per_worker,
            elapsed,
        };

        if report.winners().count() > 1 {
            warn!(
                "{} workers found valid digests; the last write to the output wins",
                report.winners().count()
            );
        }

        Ok(report)
    }

    fn spawn_progress_reporter(
        &self,
        hashes: Arc<AtomicU64>,
        done: CancellationToken,
    ) -> Option<task::JoinHandle<()>> {
        let period = self.config.progress_interval;
        if period.is_zero() {
            return None;
        }

        Some(task::spawn(async move {
            let started = Instant::now();
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let total = hashes.load(Ordering::Relaxed);
                        info!(
                            "Searched {} nonces, {}",
                            total,
                            HashRate::from_hashes(total, started.elapsed())
                        );
                    }
                    _ = done.cancelled() => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Blake2s;
    use crate::template::DEFAULT_MARKER;
    use crate::types::{Digest, Nonce};
    use crate::worker::search::CHECK_INTERVAL;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const TEMPLATE: &str =
        r#"{"nonce":"0000000000000000000000000000000000000000000000000000000000000000"}"#;

    fn template() -> (Template, usize) {
        let template = Template::from_bytes(TEMPLATE.as_bytes().to_vec());
        let offset = template.locate_nonce_field(DEFAULT_MARKER.as_bytes()).unwrap();
        (template, offset)
    }

    fn config(workers: usize, trials_per_worker: u64, target: Target) -> PoolConfig {
        PoolConfig {
            workers,
            trials_per_worker,
            start_nonce: 1_000,
            target,
            output: None,
            stop_on_first: false,
            progress_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_partition_layout() {
        let ranges = partition(100, 10, 3).unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].start(), ranges[0].end()), (100, 110));
        assert_eq!((ranges[1].start(), ranges[1].end()), (110, 120));
        assert_eq!((ranges[2].start(), ranges[2].end()), (120, 130));
    }

    #[test]
    fn test_partition_errors() {
        assert_matches!(partition(0, 10, 0), Err(Error::Config { .. }));
        assert_matches!(partition(u64::MAX - 5, 3, 2), Err(Error::Nonce { .. }));
        assert_matches!(partition(0, u64::MAX, 2), Err(Error::Nonce { .. }));
        assert!(partition(u64::MAX - 6, 3, 2).is_ok());
    }

    #[test]
    fn test_random_start_nonce_fits() {
        for _ in 0..100 {
            let start = random_start_nonce(u64::MAX / 4, 3).unwrap();
            assert!(partition(start, u64::MAX / 4, 3).is_ok());
        }
        assert!(random_start_nonce(u64::MAX, 2).is_err());
        assert_eq!(random_start_nonce(u64::MAX, 1).unwrap(), 0);
    }

    #[test]
    fn test_report_hash_rate_formula() {
        let report = PoolReport {
            outcomes: (0..4)
                .map(|worker_id| SearchOutcome {
                    worker_id,
                    range: NonceRange::new(worker_id as u64 * 500, 500).unwrap(),
                    hashes: 10,
                    block: None,
                    stopped: false,
                    persist_error: None,
                })
                .collect(),
            trials_per_worker: 500,
            elapsed: Duration::from_secs(2),
        };

        assert_eq!(report.total_trials(), 2000);
        assert_eq!(report.hashes_computed(), 40);
        assert_eq!(report.hash_rate().value(), 1000.0);
        assert_eq!(report.measured_hash_rate().value(), 20.0);
        assert_eq!(report.winners().count(), 0);
        assert!(!report.persisted());
    }

    #[test]
    fn test_report_persisted() {
        let outcome = |worker_id: usize, persist_error: Option<Error>| SearchOutcome {
            worker_id,
            range: NonceRange::new(worker_id as u64 * 10, 10).unwrap(),
            hashes: 1,
            block: Some(MinedBlock {
                worker_id,
                nonce: Nonce::new(worker_id as u64 * 10),
                digest: Digest::zeroed(32).unwrap(),
                bytes: b"block".to_vec(),
            }),
            stopped: false,
            persist_error,
        };
        let failed = || {
            let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
            Some(Error::persist("mined_block.txt", io))
        };

        let all_failed = PoolReport {
            outcomes: vec![outcome(0, failed()), outcome(1, failed())],
            trials_per_worker: 10,
            elapsed: Duration::from_secs(1),
        };
        assert_eq!(all_failed.winners().count(), 2);
        assert!(!all_failed.persisted());

        let one_written = PoolReport {
            outcomes: vec![outcome(0, failed()), outcome(1, None)],
            trials_per_worker: 10,
            elapsed: Duration::from_secs(1),
        };
        assert!(one_written.persisted());
    }

    #[tokio::test]
    async fn test_pool_every_worker_wins_easy_target() {
        let (template, offset) = template();
        let hasher = Blake2s::blake2s_256().unwrap();
        let pool = MinerPool::new(config(4, 50, Target::max()), hasher.clone()).unwrap();

        let report = pool.run(&template, offset).await.unwrap();

        assert_eq!(report.workers(), 4);
        let winners: Vec<_> = report.winners().collect();
        assert_eq!(winners.len(), 4);
        for (worker_id, block) in winners.iter().enumerate() {
            assert_eq!(block.worker_id, worker_id);
            assert_eq!(block.nonce.value(), 1_000 + 50 * worker_id as u64);
            assert_eq!(block.bytes[offset], b'0' + worker_id as u8);
            assert!(block.verify(&hasher, &Target::max()).unwrap());
        }
        // Each worker had a private buffer; the caller's template is untouched
        assert_eq!(template.bytes(), TEMPLATE.as_bytes());
    }

    #[tokio::test]
    async fn test_pool_exhausts_without_solution() {
        let (template, offset) = template();
        let hasher = Blake2s::blake2s_256().unwrap();
        let pool = MinerPool::new(config(3, 20, Target::LeadingZeroBits(256)), hasher).unwrap();

        let report = pool.run(&template, offset).await.unwrap();

        assert_eq!(report.winners().count(), 0);
        assert_eq!(report.total_trials(), 60);
        assert_eq!(report.hashes_computed(), 60);
        assert!(report.outcomes.iter().all(|outcome| !outcome.stopped));
    }

    #[tokio::test]
    async fn test_pool_persists_winner() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mined_block.txt");
        let (template, offset) = template();
        let hasher = Blake2s::blake2s_256().unwrap();

        let mut pool_config = config(2, 200, Target::LeadingZeroBits(4));
        pool_config.output = Some(output.clone());
        pool_config.stop_on_first = true;
        let pool = MinerPool::new(pool_config, hasher.clone()).unwrap();

        let report = pool.run(&template, offset).await.unwrap();

        let written = std::fs::read(&output).unwrap();
        assert!(report.winners().any(|block| block.bytes == written));
        assert!(hasher.digest(&written).unwrap().as_bytes()[0] < 0x10);
    }

    #[tokio::test]
    async fn test_pool_wide_tags() {
        let (template, offset) = template();
        let hasher = Blake2s::blake2s_256().unwrap();
        let pool = MinerPool::new(config(20, 1, Target::max()), hasher).unwrap();
        assert_eq!(pool.layout().tag_width(), 2);

        let report = pool.run(&template, offset).await.unwrap();
        let fields: std::collections::HashSet<_> = report
            .winners()
            .map(|block| block.bytes[offset..offset + 64].to_vec())
            .collect();
        assert_eq!(fields.len(), 20);
        assert!(report
            .winners()
            .all(|block| pool.layout().decode(&block.bytes[offset..offset + 64]).unwrap().0 == block.worker_id));
    }

    #[tokio::test]
    async fn test_pool_rejects_bad_offset() {
        let (template, _) = template();
        let hasher = Blake2s::blake2s_256().unwrap();
        let pool = MinerPool::new(config(2, 10, Target::max()), hasher).unwrap();

        assert_matches!(
            pool.run(&template, template.len()).await,
            Err(Error::BufferOverflow { .. })
        );
    }

    #[test]
    fn test_pool_rejects_oversized_pool() {
        let hasher = Blake2s::blake2s_256().unwrap();
        assert_matches!(
            MinerPool::new(config(MAX_WORKERS + 1, 10, Target::max()), hasher.clone()),
            Err(Error::Config { .. })
        );
        assert!(MinerPool::new(config(MAX_WORKERS, 10, Target::max()), hasher).is_ok());
    }

    /// One byte digest that is zero only for worker 0's tag at offset 10
    #[derive(Debug, Clone)]
    struct TagHash;

    impl StreamingHash for TagHash {
        type State = Option<u8>;

        fn name(&self) -> &'static str {
            "tag"
        }

        fn output_size(&self) -> usize {
            1
        }

        fn init(&self) -> Option<u8> {
            None
        }

        fn update(&self, state: &mut Option<u8>, data: &[u8]) {
            *state = data.get(10).copied();
        }

        fn finalize(&self, state: Option<u8>, out: &mut [u8]) -> Result<()> {
            out[0] = if state == Some(b'0') { 0x00 } else { 0xff };
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pool_stop_on_first_cancels_siblings() {
        let (template, offset) = template();
        assert_eq!(offset, 10);

        let mut pool_config = config(2, 1 << 40, Target::LeadingZeroBits(8));
        pool_config.stop_on_first = true;
        let pool = MinerPool::new(pool_config, TagHash).unwrap();

        let report = pool.run(&template, offset).await.unwrap();

        let winner = &report.outcomes[0];
        assert!(winner.found());
        assert!(!winner.stopped);
        assert_eq!(winner.hashes, 1);

        let sibling = &report.outcomes[1];
        assert!(!sibling.found());
        assert!(sibling.stopped);
        assert!(sibling.hashes < 1 << 40);
        assert_eq!(sibling.hashes % CHECK_INTERVAL, 0);
    }

    #[test]
    fn test_pool_rejects_unreachable_target() {
        let hasher = Blake2s::new(4).unwrap();
        assert_matches!(
            MinerPool::new(config(2, 10, Target::default()), hasher),
            Err(Error::Target { .. })
        );
    }

    proptest! {
        #[test]
        fn prop_partition_covers_space(
            start in 0u64..1_000_000,
            trials in 0u64..10_000,
            workers in 1usize..32,
        ) {
            let ranges = partition(start, trials, workers).unwrap();
            prop_assert_eq!(ranges.len(), workers);
            prop_assert_eq!(ranges[0].start(), start);
            prop_assert_eq!(ranges[workers - 1].end(), start + trials * workers as u64);

            for pair in ranges.windows(2) {
                prop_assert_eq!(pair[0].end(), pair[1].start());
            }
            for (i, a) in ranges.iter().enumerate() {
                prop_assert_eq!(a.len(), trials);
                for b in &ranges[i + 1..] {
                    prop_assert!(a.is_disjoint(b));
                }
            }
        }
    }
}
