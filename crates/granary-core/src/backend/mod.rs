pub mod local_backend;

use std::io::Read;
use std::sync::Arc;

use granary_types::blob_id::BlobId;

use crate::error::Result;

/// A blob as reported by the backend's directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobInfo {
    pub id: BlobId,
    /// On-backend byte length of the stored object.
    pub size: u64,
}

/// A snapshot the backend has listed but the manifest layer has not
/// yet decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotHandle {
    pub token: u64,
}

/// Abstract remote storage consumed by the integrity core.
///
/// The backend owns transport and decryption: `load_*` streams yield
/// plaintext bytes. Everything else about the wire protocol is out of
/// this crate's hands.
pub trait Backend: Send + Sync {
    /// Enumerate stored blobs with their on-backend sizes.
    fn list_blobs(&self) -> Result<Vec<BlobInfo>>;

    /// Enumerate snapshot handles, oldest first.
    fn list_snapshots(&self) -> Result<Vec<SnapshotHandle>>;

    /// Open a decrypted read stream for a stored blob.
    fn load_blob(&self, id: &BlobId) -> Result<Box<dyn Read + Send>>;

    /// Open a decrypted read stream for a snapshot manifest.
    fn load_snapshot(&self, handle: &SnapshotHandle) -> Result<Box<dyn Read + Send>>;

    /// Delete a stored blob. Used by the pruner; the core itself only
    /// observes deletions via `BlobCache::on_blobs_removed`.
    fn remove_blob(&self, id: &BlobId) -> Result<()>;

    /// True when loads leave the machine. Bounds verification concurrency.
    fn requires_network(&self) -> bool;
}

impl Backend for Arc<dyn Backend> {
    fn list_blobs(&self) -> Result<Vec<BlobInfo>> {
        (**self).list_blobs()
    }
    fn list_snapshots(&self) -> Result<Vec<SnapshotHandle>> {
        (**self).list_snapshots()
    }
    fn load_blob(&self, id: &BlobId) -> Result<Box<dyn Read + Send>> {
        (**self).load_blob(id)
    }
    fn load_snapshot(&self, handle: &SnapshotHandle) -> Result<Box<dyn Read + Send>> {
        (**self).load_snapshot(handle)
    }
    fn remove_blob(&self, id: &BlobId) -> Result<()> {
        (**self).remove_blob(id)
    }
    fn requires_network(&self) -> bool {
        (**self).requires_network()
    }
}
