use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::warn;

use granary_types::blob_id::BlobId;

use crate::error::{GranaryError, Result};

use super::{Backend, BlobInfo, SnapshotHandle};

const BLOB_DIR: &str = "blobs";
const SNAPSHOT_DIR: &str = "snapshots";

/// Reference backend rooted at a local directory.
///
/// Blobs live at `blobs/<hex>` and snapshot manifests at
/// `snapshots/<token>`. Mainly useful for tests and single-machine
/// setups; real deployments sit behind a remote transport implementing
/// the same trait.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory, creating the
    /// blob and snapshot folders if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(BLOB_DIR))?;
        fs::create_dir_all(root.join(SNAPSHOT_DIR))?;
        Ok(Self { root })
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(BLOB_DIR).join(id.to_hex())
    }

    fn snapshot_path(&self, token: u64) -> PathBuf {
        self.root.join(SNAPSHOT_DIR).join(token.to_string())
    }

    /// Write a blob's (already encrypted) bytes. Producer-side helper.
    pub fn store_blob(&self, id: &BlobId, data: &[u8]) -> Result<()> {
        fs::write(self.blob_path(id), data)?;
        Ok(())
    }

    /// Write a serialized snapshot manifest. Producer-side helper.
    pub fn store_snapshot(&self, token: u64, data: &[u8]) -> Result<()> {
        fs::write(self.snapshot_path(token), data)?;
        Ok(())
    }

    fn open(path: &Path, not_found: GranaryError) -> Result<Box<dyn Read + Send>> {
        match fs::File::open(path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found),
            Err(e) => Err(e.into()),
        }
    }
}

impl Backend for LocalBackend {
    fn list_blobs(&self) -> Result<Vec<BlobInfo>> {
        let mut blobs = Vec::new();
        for entry in fs::read_dir(self.root.join(BLOB_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Ok(id) = BlobId::from_hex(&name.to_string_lossy()) else {
                warn!(name = %name.to_string_lossy(), "skipping non-blob file in blob folder");
                continue;
            };
            blobs.push(BlobInfo {
                id,
                size: entry.metadata()?.len(),
            });
        }
        Ok(blobs)
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotHandle>> {
        let mut handles = Vec::new();
        for entry in fs::read_dir(self.root.join(SNAPSHOT_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Ok(token) = name.to_string_lossy().parse::<u64>() else {
                warn!(name = %name.to_string_lossy(), "skipping non-snapshot file in snapshot folder");
                continue;
            };
            handles.push(SnapshotHandle { token });
        }
        handles.sort_by_key(|h| h.token);
        Ok(handles)
    }

    fn load_blob(&self, id: &BlobId) -> Result<Box<dyn Read + Send>> {
        Self::open(&self.blob_path(id), GranaryError::BlobNotFound(*id))
    }

    fn load_snapshot(&self, handle: &SnapshotHandle) -> Result<Box<dyn Read + Send>> {
        Self::open(
            &self.snapshot_path(handle.token),
            GranaryError::SnapshotNotFound(handle.token),
        )
    }

    fn remove_blob(&self, id: &BlobId) -> Result<()> {
        match fs::remove_file(self.blob_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn requires_network(&self) -> bool {
        false
    }
}
