pub mod concurrency;
pub mod sample;

use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use granary_types::chunk_id::{ChunkId, ChunkIdHasher};

use crate::backend::Backend;
use crate::config::CheckerConfig;
use crate::error::{GranaryError, Result};
use crate::index::blob_cache::BlobCache;
use crate::notify::CheckNotifier;
use crate::snapshot::{self, BlobDescriptor, Snapshot};

use self::concurrency::{CancelFlag, ProgressTracker};
use self::sample::build_sample;

/// Ceiling on concurrent blob fetches against a remote backend.
const NETWORK_WORKER_LIMIT: usize = 3;

/// Ceiling for local backends; in practice bounded by the core count.
const LOCAL_WORKER_LIMIT: usize = 42;

/// One verification task: a chunk and the descriptor a snapshot stored
/// for it. Pairs are verified independently; the same chunk may map
/// to different blobs across snapshots.
pub type BlobPair = (ChunkId, BlobDescriptor);

/// Where a check run currently is. `Idle` with a stored result means
/// the previous run reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CheckPhase {
    Idle = 0,
    Loading = 1,
    Sampling = 2,
    Verifying = 3,
}

/// Outcome of a completed check run.
#[derive(Debug)]
pub enum CheckerResult {
    /// Every sampled blob verified and every listed snapshot decoded.
    Success {
        snapshots: Vec<Snapshot>,
        percent: u8,
        /// Bytes covered by the sample, deduplicated by blob ID.
        size: u64,
    },
    /// At least one pair failed, a snapshot failed to decode, or the
    /// repository is empty.
    Error(CheckerError),
    /// The run never got as far as sampling.
    GeneralError { cause: GranaryError },
}

/// Error verdict: which snapshots the backend listed, which decoded,
/// and which pairs failed verification.
#[derive(Debug)]
pub struct CheckerError {
    /// Snapshot handles the backend listed; at least the decoded count.
    pub existing_snapshots: usize,
    pub snapshots: Vec<Snapshot>,
    pub bad_pairs: HashSet<BlobPair>,
}

impl CheckerError {
    /// Snapshots referencing at least one bad pair.
    ///
    /// The split is by `(chunk, blob)` pair, not by chunk alone: a
    /// snapshot sharing a chunk ID with a bad pair stays good as long
    /// as its own descriptor points at a different, verified blob.
    pub fn bad_snapshots(&self) -> Vec<&Snapshot> {
        self.snapshots.iter().filter(|s| self.is_bad(s)).collect()
    }

    pub fn good_snapshots(&self) -> Vec<&Snapshot> {
        self.snapshots.iter().filter(|s| !self.is_bad(s)).collect()
    }

    fn is_bad(&self, snapshot: &Snapshot) -> bool {
        snapshot
            .blobs
            .iter()
            .any(|(chunk_id, blob)| self.bad_pairs.contains(&(*chunk_id, *blob)))
    }
}

/// Samples the stored blob population, re-hashes each sampled blob and
/// classifies every snapshot as good or bad.
///
/// One `Checker` is tied to one repository; it owns the quarantine
/// writes that hash mismatches produce.
pub struct Checker {
    backend: Arc<dyn Backend>,
    cache: Mutex<BlobCache>,
    notifier: Arc<dyn CheckNotifier>,
    config: CheckerConfig,
    cancel: CancelFlag,
    phase: AtomicU8,
    result: Mutex<Option<Arc<CheckerResult>>>,
}

impl Checker {
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: BlobCache,
        notifier: Arc<dyn CheckNotifier>,
        config: CheckerConfig,
    ) -> Self {
        Self {
            backend,
            cache: Mutex::new(cache),
            notifier,
            config,
            cancel: CancelFlag::default(),
            phase: AtomicU8::new(CheckPhase::Idle as u8),
            result: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> CheckPhase {
        match self.phase.load(Ordering::Acquire) {
            1 => CheckPhase::Loading,
            2 => CheckPhase::Sampling,
            3 => CheckPhase::Verifying,
            _ => CheckPhase::Idle,
        }
    }

    fn set_phase(&self, phase: CheckPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// The last terminal result, if any.
    pub fn checker_result(&self) -> Option<Arc<CheckerResult>> {
        self.result.lock().unwrap().clone()
    }

    /// Forget the last result, returning to `Idle`.
    pub fn clear(&self) {
        *self.result.lock().unwrap() = None;
        self.set_phase(CheckPhase::Idle);
    }

    /// Request cancellation of the running check. Workers stop between
    /// blobs and no result is stored.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run an integrity check over `percent` of the stored bytes.
    ///
    /// Returns the stored terminal result. Fails fast on an
    /// out-of-range percentage. When `cancel` fires mid-run this
    /// returns `Cancelled` without touching the stored result.
    pub fn check(&self, percent: u8) -> Result<Arc<CheckerResult>> {
        if percent > 100 {
            return Err(GranaryError::InvalidPercent(percent));
        }
        self.cancel.reset();
        self.set_phase(CheckPhase::Loading);
        match self.run(percent) {
            Ok(result) => {
                *self.result.lock().unwrap() = Some(result.clone());
                self.set_phase(CheckPhase::Idle);
                Ok(result)
            }
            Err(e) => {
                self.set_phase(CheckPhase::Idle);
                Err(e)
            }
        }
    }

    fn run(&self, percent: u8) -> Result<Arc<CheckerResult>> {
        let handles = match self.backend.list_snapshots() {
            Ok(handles) => handles,
            Err(cause) => {
                warn!(error = %cause, "listing snapshots failed, aborting check");
                self.notifier.on_check_finished_with_error(0, 0);
                return Ok(Arc::new(CheckerResult::GeneralError { cause }));
            }
        };
        let snapshots = snapshot::load_snapshots(self.backend.as_ref(), &handles);
        let handle_count = handles.len();
        if snapshots.len() < handle_count {
            warn!(
                listed = handle_count,
                decoded = snapshots.len(),
                "some snapshots failed to decode"
            );
        }
        if self.cancel.is_cancelled() {
            return Err(GranaryError::Cancelled);
        }

        self.set_phase(CheckPhase::Sampling);
        let sample = build_sample(&snapshots, percent, &mut rand::thread_rng());
        let sample_size = sample.total_size();

        self.set_phase(CheckPhase::Verifying);
        let tracker = ProgressTracker::new(sample_size, self.config.notify_interval_ms);
        let bad_pairs = self.verify_sample(sample.entries, &tracker)?;

        let bytes_checked = tracker.bytes_checked();
        let bandwidth = tracker.bandwidth();
        let result = if bad_pairs.is_empty() && handle_count == snapshots.len() && handle_count > 0
        {
            self.notifier.on_check_complete(bytes_checked, bandwidth);
            CheckerResult::Success {
                snapshots,
                percent,
                size: sample_size,
            }
        } else {
            self.notifier
                .on_check_finished_with_error(bytes_checked, bandwidth);
            CheckerResult::Error(CheckerError {
                existing_snapshots: handle_count,
                snapshots,
                bad_pairs,
            })
        };
        Ok(Arc::new(result))
    }

    /// Fetch and re-hash every sampled pair with a bounded worker pool.
    ///
    /// Worker count is `min(cores, 3)` for network backends and
    /// `min(cores, 42)` locally; the fixed pool is the permit bound on
    /// concurrent loads.
    fn verify_sample(
        &self,
        entries: Vec<BlobPair>,
        tracker: &ProgressTracker,
    ) -> Result<HashSet<BlobPair>> {
        if entries.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(GranaryError::Cancelled);
            }
            return Ok(HashSet::new());
        }

        let limit = if self.backend.requires_network() {
            NETWORK_WORKER_LIMIT
        } else {
            LOCAL_WORKER_LIMIT
        };
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let workers = cores.min(limit).min(entries.len()).max(1);
        debug!(workers, entries = entries.len(), "verifying sample");

        let (tx, rx) = crossbeam_channel::unbounded::<BlobPair>();
        for entry in entries {
            let _ = tx.send(entry);
        }
        drop(tx);

        let bad_pairs: Mutex<HashSet<BlobPair>> = Mutex::new(HashSet::new());
        thread::scope(|s| {
            for _ in 0..workers {
                let rx = rx.clone();
                let bad_pairs = &bad_pairs;
                s.spawn(move || {
                    while let Ok((chunk_id, blob)) = rx.recv() {
                        if self.cancel.is_cancelled() {
                            return;
                        }
                        match self.verify_blob(&chunk_id, &blob) {
                            Ok(()) => {
                                if let Some((bytes_per_sec, permille)) = tracker.add(blob.length) {
                                    self.notifier.show_check_notification(bytes_per_sec, permille);
                                }
                            }
                            Err(VerifyFailure::HashMismatch) => {
                                warn!(chunk = %chunk_id, blob = %blob.id, "hash mismatch, quarantining blob");
                                let cache = self.cache.lock().unwrap();
                                if let Err(e) = cache.do_not_use_blob(&blob.id) {
                                    warn!(blob = %blob.id, error = %e, "failed to quarantine blob");
                                }
                                drop(cache);
                                bad_pairs.lock().unwrap().insert((chunk_id, blob));
                            }
                            Err(VerifyFailure::Io(e)) => {
                                // Transient backend trouble must not poison
                                // future runs, so no quarantine here.
                                warn!(chunk = %chunk_id, blob = %blob.id, error = %e, "failed to read blob");
                                bad_pairs.lock().unwrap().insert((chunk_id, blob));
                            }
                        }
                    }
                });
            }
        });

        if self.cancel.is_cancelled() {
            return Err(GranaryError::Cancelled);
        }
        Ok(bad_pairs.into_inner().unwrap())
    }

    /// Stream one blob to EOF through the hashing reader and compare
    /// the recomputed content hash against the expected chunk ID.
    fn verify_blob(
        &self,
        chunk_id: &ChunkId,
        blob: &BlobDescriptor,
    ) -> std::result::Result<(), VerifyFailure> {
        let reader = self.backend.load_blob(&blob.id).map_err(VerifyFailure::Io)?;
        let mut hashing = HashingReader::new(reader);
        std::io::copy(&mut hashing, &mut std::io::sink())
            .map_err(|e| VerifyFailure::Io(e.into()))?;
        if hashing.finalize() == *chunk_id {
            Ok(())
        } else {
            Err(VerifyFailure::HashMismatch)
        }
    }
}

enum VerifyFailure {
    /// Content read fine but hashes to something else. Quarantine.
    HashMismatch,
    /// Read, decryption or authentication failure. No quarantine.
    Io(GranaryError),
}

/// Read adaptor that hashes every byte passing through it.
struct HashingReader<R> {
    inner: R,
    hasher: ChunkIdHasher,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ChunkIdHasher::new(),
        }
    }

    fn finalize(self) -> ChunkId {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
