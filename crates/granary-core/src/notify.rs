use tracing::{info, warn};

/// Fire-and-forget notification surface for check runs.
///
/// Implementations must not block: the verifier calls these from worker
/// threads while holding no locks, and ignores any outcome.
pub trait CheckNotifier: Send + Sync {
    /// Throttled progress report: current read bandwidth and how much of
    /// the sample has been verified, in permille.
    fn show_check_notification(&self, bytes_per_sec: u64, permille: u16);

    /// The check finished and every sampled blob verified.
    fn on_check_complete(&self, bytes_checked: u64, bytes_per_sec: u64);

    /// The check finished with at least one failed blob or snapshot.
    fn on_check_finished_with_error(&self, bytes_checked: u64, bytes_per_sec: u64);
}

/// Default notifier that reports through the tracing pipeline.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl CheckNotifier for LogNotifier {
    fn show_check_notification(&self, bytes_per_sec: u64, permille: u16) {
        info!(bytes_per_sec, permille, "check progress");
    }

    fn on_check_complete(&self, bytes_checked: u64, bytes_per_sec: u64) {
        info!(bytes_checked, bytes_per_sec, "check complete");
    }

    fn on_check_finished_with_error(&self, bytes_checked: u64, bytes_per_sec: u64) {
        warn!(bytes_checked, bytes_per_sec, "check finished with errors");
    }
}
