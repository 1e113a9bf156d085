use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Mutex;

use granary_types::blob_id::BlobId;
use granary_types::chunk_id::ChunkId;

use crate::backend::{Backend, BlobInfo, SnapshotHandle};
use crate::error::{GranaryError, Result};
use crate::snapshot::{BlobDescriptor, Snapshot};

/// In-memory backend for testing. Thread-safe via Mutex, with per-blob
/// fault injection for transient read failures and a listing kill
/// switch for the general-error path.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: Mutex<HashMap<BlobId, Vec<u8>>>,
    snapshots: Mutex<HashMap<u64, Vec<u8>>>,
    fail_loads: Mutex<HashSet<BlobId>>,
    fail_snapshot_listing: Mutex<bool>,
    network: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_blob(&self, id: BlobId, data: Vec<u8>) {
        self.blobs.lock().unwrap().insert(id, data);
    }

    pub fn put_snapshot(&self, snapshot: &Snapshot) {
        let bytes = snapshot.to_bytes().expect("snapshot serializes");
        self.snapshots.lock().unwrap().insert(snapshot.token, bytes);
    }

    /// Store raw manifest bytes, e.g. garbage that will fail to decode.
    pub fn put_raw_snapshot(&self, token: u64, bytes: Vec<u8>) {
        self.snapshots.lock().unwrap().insert(token, bytes);
    }

    /// Make every `load_blob` of this id fail with a backend error.
    pub fn fail_loads_of(&self, id: BlobId) {
        self.fail_loads.lock().unwrap().insert(id);
    }

    /// Make `list_snapshots` fail with a backend error.
    pub fn fail_snapshot_listing(&self) {
        *self.fail_snapshot_listing.lock().unwrap() = true;
    }
}

impl Backend for MemoryBackend {
    fn list_blobs(&self) -> Result<Vec<BlobInfo>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, data)| BlobInfo {
                id: *id,
                size: data.len() as u64,
            })
            .collect())
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotHandle>> {
        if *self.fail_snapshot_listing.lock().unwrap() {
            return Err(GranaryError::Backend("injected listing failure".into()));
        }
        let mut handles: Vec<SnapshotHandle> = self
            .snapshots
            .lock()
            .unwrap()
            .keys()
            .map(|token| SnapshotHandle { token: *token })
            .collect();
        handles.sort_by_key(|h| h.token);
        Ok(handles)
    }

    fn load_blob(&self, id: &BlobId) -> Result<Box<dyn Read + Send>> {
        if self.fail_loads.lock().unwrap().contains(id) {
            return Err(GranaryError::Backend("injected read failure".into()));
        }
        match self.blobs.lock().unwrap().get(id) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(GranaryError::BlobNotFound(*id)),
        }
    }

    fn load_snapshot(&self, handle: &SnapshotHandle) -> Result<Box<dyn Read + Send>> {
        match self.snapshots.lock().unwrap().get(&handle.token) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(GranaryError::SnapshotNotFound(handle.token)),
        }
    }

    fn remove_blob(&self, id: &BlobId) -> Result<()> {
        self.blobs.lock().unwrap().remove(id);
        Ok(())
    }

    fn requires_network(&self) -> bool {
        self.network
    }
}

/// Store `content` as a fresh blob and return the matching pair: the
/// chunk ID is the content hash and the descriptor length the stored
/// byte count, so verification succeeds unless the test tampers.
pub fn store_blob(backend: &MemoryBackend, content: &[u8]) -> (ChunkId, BlobDescriptor) {
    let id = BlobId::generate();
    backend.put_blob(id, content.to_vec());
    let blob = BlobDescriptor {
        id,
        length: content.len() as u64,
        uncompressed_length: content.len() as u64,
    };
    (ChunkId::compute(content), blob)
}

/// A descriptor pair without backing content, for cache/index tests
/// that never fetch the blob.
pub fn synthetic_pair(seed: u8, length: u64) -> (ChunkId, BlobDescriptor) {
    let blob = BlobDescriptor {
        id: BlobId([seed; 32]),
        length,
        uncompressed_length: length,
    };
    (ChunkId::compute(&[seed]), blob)
}
