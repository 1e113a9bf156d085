use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use granary_types::blob_id::BlobId;
use granary_types::chunk_id::ChunkId;

use crate::snapshot::Snapshot;

use super::BlobPair;

/// Blobs chosen for one check run, app-data entries first.
#[derive(Debug, Default)]
pub struct Sample {
    pub entries: Vec<BlobPair>,
    /// Total bytes of all distinct app-data blobs in the repository.
    pub app_size: u64,
    /// Total bytes of all distinct package-artifact blobs.
    pub package_size: u64,
    /// Bytes the sample was asked to cover.
    pub target_size: u64,
}

impl Sample {
    /// Bytes actually covered by the chosen entries.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|(_, blob)| blob.length).sum()
    }
}

/// Choose a size-weighted random subset of blobs to verify.
///
/// App data is prioritized at 75% of the target because package
/// artifacts are recoverable by reinstall, but data is not. Both
/// partitions are deduplicated by blob ID so the same physical blob is
/// never fetched twice; a chunk with differing descriptors across
/// snapshots legitimately yields one entry per distinct blob.
pub(crate) fn build_sample<R: Rng>(snapshots: &[Snapshot], percent: u8, rng: &mut R) -> Sample {
    let (mut app_entries, mut package_entries) = partition_blobs(snapshots);

    let app_size: u64 = app_entries.iter().map(|(_, b)| b.length).sum();
    let package_size: u64 = package_entries.iter().map(|(_, b)| b.length).sum();
    let total_size = app_size + package_size;

    let target_size = round_percent(total_size, percent);
    let app_target_size = round_three_quarters(target_size).min(app_size);

    app_entries.shuffle(rng);
    package_entries.shuffle(rng);

    let mut entries = Vec::new();
    let mut accumulated = 0u64;
    for entry in app_entries {
        if accumulated >= app_target_size {
            break;
        }
        accumulated += entry.1.length;
        entries.push(entry);
    }
    for entry in package_entries {
        if accumulated >= target_size {
            break;
        }
        accumulated += entry.1.length;
        entries.push(entry);
    }

    debug!(
        entries = entries.len(),
        bytes = accumulated,
        target = target_size,
        "built check sample"
    );

    Sample {
        entries,
        app_size,
        package_size,
        target_size,
    }
}

/// Split the snapshot set's blobs by origin: app data streams versus
/// package-artifact splits. Each partition is deduplicated by blob ID,
/// and a blob referenced from both origins counts as app data.
fn partition_blobs(snapshots: &[Snapshot]) -> (Vec<BlobPair>, Vec<BlobPair>) {
    let mut app_entries = Vec::new();
    let mut package_entries = Vec::new();
    let mut seen_app: HashSet<BlobId> = HashSet::new();
    let mut seen_package: HashSet<BlobId> = HashSet::new();

    for snapshot in snapshots {
        for (name, app) in &snapshot.apps {
            for chunk_id in &app.chunks {
                match snapshot.blobs.get(chunk_id) {
                    Some(blob) => {
                        if seen_app.insert(blob.id) {
                            app_entries.push((*chunk_id, *blob));
                        }
                    }
                    None => warn_unmapped(snapshot.token, name, chunk_id),
                }
            }
        }
    }

    for snapshot in snapshots {
        for (name, app) in &snapshot.apps {
            let Some(package) = &app.package else {
                continue;
            };
            for split in &package.splits {
                for chunk_id in &split.chunks {
                    match snapshot.blobs.get(chunk_id) {
                        Some(blob) => {
                            if !seen_app.contains(&blob.id) && seen_package.insert(blob.id) {
                                package_entries.push((*chunk_id, *blob));
                            }
                        }
                        None => warn_unmapped(snapshot.token, name, chunk_id),
                    }
                }
            }
        }
    }

    (app_entries, package_entries)
}

fn warn_unmapped(token: u64, app: &str, chunk_id: &ChunkId) {
    warn!(token, app, chunk = %chunk_id, "chunk listed by app but missing from snapshot blob map");
}

/// `round(n * percent / 100)`, half up, in integers.
fn round_percent(n: u64, percent: u8) -> u64 {
    (n * u64::from(percent) + 50) / 100
}

/// `round(n * 0.75)`, half up, in integers.
fn round_three_quarters(n: u64) -> u64 {
    (n * 3 + 2) / 4
}
