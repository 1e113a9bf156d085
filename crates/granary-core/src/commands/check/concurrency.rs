use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Cooperative cancellation shared between the caller and verify workers.
///
/// Workers poll the flag between blobs; an in-flight read finishes but
/// its result is discarded and the final verdict step is skipped.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared byte accounting for a verification run, with throttled
/// progress reports.
///
/// Counters are atomics: interleaved reads may observe stale values,
/// which is fine for advisory reports.
pub(crate) struct ProgressTracker {
    started: Instant,
    bytes: AtomicU64,
    last_report_ms: AtomicU64,
    interval_ms: u64,
    sample_size: u64,
}

impl ProgressTracker {
    pub(crate) fn new(sample_size: u64, interval_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            bytes: AtomicU64::new(0),
            last_report_ms: AtomicU64::new(0),
            interval_ms,
            sample_size,
        }
    }

    /// Account `n` verified bytes. Returns `(bytes_per_sec, permille)`
    /// when a progress report is due: at most once per interval, with
    /// a compare-exchange electing a single reporting thread.
    pub(crate) fn add(&self, n: u64) -> Option<(u64, u16)> {
        let total = self.bytes.fetch_add(n, Ordering::Relaxed) + n;
        let now_ms = self.started.elapsed().as_millis() as u64;
        let last = self.last_report_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.interval_ms {
            return None;
        }
        if self
            .last_report_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        Some((bytes_per_sec(total, now_ms), self.permille(total)))
    }

    pub(crate) fn bytes_checked(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Average bandwidth over the whole run so far.
    pub(crate) fn bandwidth(&self) -> u64 {
        bytes_per_sec(self.bytes_checked(), self.started.elapsed().as_millis() as u64)
    }

    fn permille(&self, bytes: u64) -> u16 {
        if self.sample_size == 0 {
            return 1000;
        }
        (bytes.min(self.sample_size) * 1000 / self.sample_size) as u16
    }
}

fn bytes_per_sec(bytes: u64, elapsed_ms: u64) -> u64 {
    bytes.saturating_mul(1000) / elapsed_ms.max(1)
}
