use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use granary_types::blob_id::BlobId;
use granary_types::chunk_id::ChunkId;

use crate::backend::{Backend, SnapshotHandle};
use crate::error::Result;

/// Descriptor for one stored blob, as recorded inside snapshot manifests.
///
/// `length` is the on-backend byte count and is compared for exact
/// equality against backend listings, so it carries the listing's full
/// 64-bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub id: BlobId,
    pub length: u64,
    /// Plaintext byte length. Informational only.
    pub uncompressed_length: u64,
}

/// A backup manifest: one complete view of application state at a
/// point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Creation time in milliseconds since the epoch; monotonic across
    /// snapshots of one repository and doubles as the identifier.
    pub token: u64,
    pub time: DateTime<Utc>,
    /// Every chunk this snapshot references, keyed by content hash.
    /// The sole authoritative descriptor source when verifying a chunk
    /// within this snapshot.
    pub blobs: HashMap<ChunkId, BlobDescriptor>,
    /// Per-application state, keyed by package name.
    pub apps: BTreeMap<String, AppState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppState {
    /// Ordered chunk list of the app's data stream.
    pub chunks: Vec<ChunkId>,
    /// The app's installable package, when backed up alongside its data.
    #[serde(default)]
    pub package: Option<PackageState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageState {
    pub splits: Vec<PackageSplit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSplit {
    pub name: String,
    pub chunks: Vec<ChunkId>,
}

impl Snapshot {
    pub fn new(token: u64) -> Self {
        Self {
            token,
            time: Utc::now(),
            blobs: HashMap::new(),
            apps: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> SnapshotHandle {
        SnapshotHandle { token: self.token }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(rmp_serde::from_read(reader)?)
    }
}

/// Load and decode every listed snapshot manifest, in handle order.
///
/// A manifest that fails to load or decode is skipped with a warning;
/// callers compare `handles.len()` against the returned count to learn
/// about the gap.
pub fn load_snapshots(backend: &dyn Backend, handles: &[SnapshotHandle]) -> Vec<Snapshot> {
    let mut snapshots = Vec::with_capacity(handles.len());
    for handle in handles {
        let reader = match backend.load_snapshot(handle) {
            Ok(r) => r,
            Err(e) => {
                warn!(token = handle.token, error = %e, "failed to load snapshot");
                continue;
            }
        };
        match Snapshot::from_reader(reader) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                warn!(token = handle.token, error = %e, "failed to decode snapshot");
            }
        }
    }
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let mut snapshot = Snapshot::new(1_700_000_000_000);
        let chunk_id = ChunkId::compute(b"some chunk");
        let blob = BlobDescriptor {
            id: BlobId::generate(),
            length: 42,
            uncompressed_length: 64,
        };
        snapshot.blobs.insert(chunk_id, blob);
        snapshot.apps.insert(
            "org.example.notes".into(),
            AppState {
                chunks: vec![chunk_id],
                package: Some(PackageState {
                    splits: vec![PackageSplit {
                        name: "base".into(),
                        chunks: vec![chunk_id],
                    }],
                }),
            },
        );

        let bytes = snapshot.to_bytes().unwrap();
        let decoded = Snapshot::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(decoded.token, snapshot.token);
        assert_eq!(decoded.blobs.get(&chunk_id), Some(&blob));
        let app = decoded.apps.get("org.example.notes").unwrap();
        assert_eq!(app.chunks, vec![chunk_id]);
        assert_eq!(app.package.as_ref().unwrap().splits[0].name, "base");
    }

    #[test]
    fn handle_carries_token() {
        let snapshot = Snapshot::new(7);
        assert_eq!(snapshot.handle().token, 7);
    }
}
