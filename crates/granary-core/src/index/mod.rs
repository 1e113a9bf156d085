pub mod blob_cache;

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use granary_types::blob_id::BlobId;
use granary_types::chunk_id::ChunkId;

use crate::backend::BlobInfo;
use crate::error::Result;
use crate::snapshot::{BlobDescriptor, Snapshot};

use self::blob_cache::BlobCache;

/// In-memory chunk-to-blob index for one backup run.
///
/// Populated once before backup writers execute, then read for dedup
/// lookups. Every entry satisfies: the blob is on the backend at
/// exactly the recorded length, and is not quarantined.
#[derive(Debug, Default)]
pub struct BlobIndex {
    entries: HashMap<ChunkId, BlobDescriptor>,
}

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from the persistent cache, the snapshot set
    /// and the backend listing.
    ///
    /// Only blobs the backend reports at the expected size survive;
    /// quarantined blobs are excluded up front. Snapshot entries are
    /// applied in input order and never displace an existing chunk
    /// mapping.
    pub fn populate(
        &mut self,
        cache: &BlobCache,
        backend_blobs: &[BlobInfo],
        snapshots: &[Snapshot],
    ) {
        self.entries.clear();

        let mut allowed: HashMap<BlobId, u64> =
            backend_blobs.iter().map(|info| (info.id, info.size)).collect();

        let quarantined: HashSet<BlobId> = cache
            .get_quarantine()
            .iter()
            .filter_map(|id_hex| BlobId::from_hex(id_hex).ok())
            .collect();
        allowed.retain(|id, _| !quarantined.contains(id));

        cache.load(&allowed, |chunk_id, blob| {
            self.entries.insert(chunk_id, blob);
        });

        for snapshot in snapshots {
            for (chunk_id, blob) in &snapshot.blobs {
                match allowed.get(&blob.id) {
                    Some(size) if *size == blob.length => {
                        if let Some(existing) = self.entries.get(chunk_id) {
                            if existing.id != blob.id {
                                warn!(
                                    chunk = %chunk_id,
                                    kept = %existing.id,
                                    ignored = %blob.id,
                                    "conflicting descriptors for chunk, keeping earlier entry"
                                );
                            }
                        } else {
                            self.entries.insert(*chunk_id, *blob);
                        }
                    }
                    Some(size) => {
                        warn!(
                            token = snapshot.token,
                            blob = %blob.id,
                            expected = blob.length,
                            actual = size,
                            "snapshot references blob with mismatching backend size"
                        );
                    }
                    None => {
                        warn!(
                            token = snapshot.token,
                            blob = %blob.id,
                            "snapshot references blob missing from backend"
                        );
                    }
                }
            }
        }

        debug!(entries = self.entries.len(), "populated blob index");
    }

    pub fn get(&self, chunk_id: &ChunkId) -> Option<&BlobDescriptor> {
        self.entries.get(chunk_id)
    }

    /// True when every given chunk has an index entry.
    pub fn contains_all(&self, chunk_ids: &[ChunkId]) -> bool {
        chunk_ids.iter().all(|id| self.entries.contains_key(id))
    }

    /// Record a freshly uploaded blob.
    ///
    /// Inserts only if the chunk is absent; a fresh insert is also
    /// appended to the persistent log so it survives a crash before
    /// the snapshot is written.
    pub fn save_new_blob(
        &mut self,
        cache: &BlobCache,
        chunk_id: ChunkId,
        blob: BlobDescriptor,
    ) -> Result<()> {
        if self.entries.contains_key(&chunk_id) {
            return Ok(());
        }
        cache.save_new_blob(&chunk_id, &blob)?;
        self.entries.insert(chunk_id, blob);
        Ok(())
    }

    /// Release the index memory at the end of a backup run.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
