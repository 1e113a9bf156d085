use std::sync::Mutex;

use granary_types::chunk_id::ChunkId;

use crate::notify::CheckNotifier;
use crate::snapshot::{AppState, BlobDescriptor, PackageSplit, PackageState, Snapshot};

/// Build a snapshot whose apps each carry a flat data chunk list.
pub fn snapshot_with_app_chunks(token: u64, app: &str, pairs: &[(ChunkId, BlobDescriptor)]) -> Snapshot {
    let mut snapshot = Snapshot::new(token);
    add_app_chunks(&mut snapshot, app, pairs);
    snapshot
}

/// Append data-stream chunks to one app, registering their descriptors.
pub fn add_app_chunks(snapshot: &mut Snapshot, app: &str, pairs: &[(ChunkId, BlobDescriptor)]) {
    let entry = snapshot.apps.entry(app.to_string()).or_default();
    for (chunk_id, blob) in pairs {
        entry.chunks.push(*chunk_id);
        snapshot.blobs.insert(*chunk_id, *blob);
    }
}

/// Append package-split chunks to one app, registering their descriptors.
pub fn add_package_chunks(
    snapshot: &mut Snapshot,
    app: &str,
    split: &str,
    pairs: &[(ChunkId, BlobDescriptor)],
) {
    let entry = snapshot
        .apps
        .entry(app.to_string())
        .or_insert_with(AppState::default);
    let package = entry.package.get_or_insert_with(PackageState::default);
    package.splits.push(PackageSplit {
        name: split.to_string(),
        chunks: pairs.iter().map(|(chunk_id, _)| *chunk_id).collect(),
    });
    for (chunk_id, blob) in pairs {
        snapshot.blobs.insert(*chunk_id, *blob);
    }
}

/// Notifier that records every call for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<NotifierEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierEvent {
    Progress { bytes_per_sec: u64, permille: u16 },
    Complete { bytes_checked: u64 },
    Failed { bytes_checked: u64 },
}

impl RecordingNotifier {
    pub fn completions(&self) -> Vec<u64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                NotifierEvent::Complete { bytes_checked } => Some(*bytes_checked),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<u64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                NotifierEvent::Failed { bytes_checked } => Some(*bytes_checked),
                _ => None,
            })
            .collect()
    }
}

impl CheckNotifier for RecordingNotifier {
    fn show_check_notification(&self, bytes_per_sec: u64, permille: u16) {
        self.events.lock().unwrap().push(NotifierEvent::Progress {
            bytes_per_sec,
            permille,
        });
    }

    fn on_check_complete(&self, bytes_checked: u64, _bytes_per_sec: u64) {
        self.events
            .lock()
            .unwrap()
            .push(NotifierEvent::Complete { bytes_checked });
    }

    fn on_check_finished_with_error(&self, bytes_checked: u64, _bytes_per_sec: u64) {
        self.events
            .lock()
            .unwrap()
            .push(NotifierEvent::Failed { bytes_checked });
    }
}
