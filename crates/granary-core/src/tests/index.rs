use std::collections::HashMap;

use granary_types::blob_id::BlobId;
use granary_types::chunk_id::ChunkId;

use crate::backend::BlobInfo;
use crate::index::blob_cache::BlobCache;
use crate::index::BlobIndex;
use crate::snapshot::BlobDescriptor;
use crate::tests::helpers::snapshot_with_app_chunks;
use crate::testutil::synthetic_pair;

fn listing_for(pairs: &[(ChunkId, BlobDescriptor)]) -> Vec<BlobInfo> {
    pairs
        .iter()
        .map(|(_, blob)| BlobInfo {
            id: blob.id,
            size: blob.length,
        })
        .collect()
}

#[test]
fn populate_restores_saved_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();
    let pairs: Vec<_> = (1u8..=4).map(|i| synthetic_pair(i, 100 * i as u64)).collect();

    let mut index = BlobIndex::new();
    for (chunk_id, blob) in &pairs {
        index.save_new_blob(&cache, *chunk_id, *blob).unwrap();
    }

    // Fresh index, fresh cache handle: only the log and listing feed it.
    let cache = BlobCache::new(dir.path()).unwrap();
    let mut index = BlobIndex::new();
    index.populate(&cache, &listing_for(&pairs), &[]);

    assert_eq!(index.len(), 4);
    for (chunk_id, blob) in &pairs {
        assert_eq!(index.get(chunk_id), Some(blob));
    }
}

#[test]
fn populate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();
    let pairs: Vec<_> = (1u8..=3).map(|i| synthetic_pair(i, 10 * i as u64)).collect();
    for (chunk_id, blob) in &pairs {
        cache.save_new_blob(chunk_id, blob).unwrap();
    }
    let snapshot = snapshot_with_app_chunks(1, "org.example.app", &pairs);

    let mut index = BlobIndex::new();
    index.populate(&cache, &listing_for(&pairs), std::slice::from_ref(&snapshot));
    let first: HashMap<ChunkId, BlobDescriptor> =
        pairs.iter().map(|(c, _)| (*c, *index.get(c).unwrap())).collect();

    index.populate(&cache, &listing_for(&pairs), std::slice::from_ref(&snapshot));
    assert_eq!(index.len(), first.len());
    for (chunk_id, blob) in &first {
        assert_eq!(index.get(chunk_id), Some(blob));
    }
}

#[test]
fn populate_excludes_quarantined_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (good_chunk, good_blob) = synthetic_pair(1, 100);
    let (bad_chunk, bad_blob) = synthetic_pair(2, 200);
    cache.save_new_blob(&good_chunk, &good_blob).unwrap();
    cache.save_new_blob(&bad_chunk, &bad_blob).unwrap();
    cache.do_not_use_blob(&bad_blob.id).unwrap();

    let mut index = BlobIndex::new();
    index.populate(
        &cache,
        &listing_for(&[(good_chunk, good_blob), (bad_chunk, bad_blob)]),
        &[],
    );

    assert_eq!(index.get(&good_chunk), Some(&good_blob));
    assert_eq!(index.get(&bad_chunk), None);
}

#[test]
fn populate_excludes_quarantined_snapshot_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (chunk_id, blob) = synthetic_pair(1, 100);
    cache.do_not_use_blob(&blob.id).unwrap();
    let snapshot = snapshot_with_app_chunks(1, "org.example.app", &[(chunk_id, blob)]);

    let mut index = BlobIndex::new();
    index.populate(&cache, &listing_for(&[(chunk_id, blob)]), &[snapshot]);
    assert!(index.is_empty());
}

#[test]
fn populate_accepts_snapshot_blobs_matching_listing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let pairs: Vec<_> = (1u8..=2).map(|i| synthetic_pair(i, 64)).collect();
    let snapshot = snapshot_with_app_chunks(1, "org.example.app", &pairs);

    let mut index = BlobIndex::new();
    index.populate(&cache, &listing_for(&pairs), &[snapshot]);
    assert_eq!(index.len(), 2);
}

#[test]
fn populate_drops_snapshot_blob_missing_from_backend() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (listed_chunk, listed_blob) = synthetic_pair(1, 64);
    let (unlisted_chunk, unlisted_blob) = synthetic_pair(2, 64);
    let snapshot = snapshot_with_app_chunks(
        1,
        "org.example.app",
        &[(listed_chunk, listed_blob), (unlisted_chunk, unlisted_blob)],
    );

    let mut index = BlobIndex::new();
    index.populate(&cache, &listing_for(&[(listed_chunk, listed_blob)]), &[snapshot]);
    assert_eq!(index.len(), 1);
    assert_eq!(index.get(&unlisted_chunk), None);
}

#[test]
fn populate_drops_snapshot_blob_with_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (chunk_id, blob) = synthetic_pair(1, 100);
    let snapshot = snapshot_with_app_chunks(1, "org.example.app", &[(chunk_id, blob)]);

    let listing = vec![BlobInfo {
        id: blob.id,
        size: 99,
    }];
    let mut index = BlobIndex::new();
    index.populate(&cache, &listing, &[snapshot]);
    assert_eq!(index.get(&chunk_id), None);
}

#[test]
fn populate_size_mismatch_filters_cached_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (chunk_id, blob) = synthetic_pair(1, 100);
    cache.save_new_blob(&chunk_id, &blob).unwrap();

    let listing = vec![BlobInfo {
        id: blob.id,
        size: 99,
    }];
    let mut index = BlobIndex::new();
    index.populate(&cache, &listing, &[]);
    assert_eq!(index.get(&chunk_id), None);
}

#[test]
fn populate_keeps_earlier_entry_on_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let chunk_id = ChunkId::compute(b"shared chunk");
    let first = BlobDescriptor {
        id: BlobId([0x0A; 32]),
        length: 100,
        uncompressed_length: 100,
    };
    let second = BlobDescriptor {
        id: BlobId([0x0B; 32]),
        length: 100,
        uncompressed_length: 100,
    };
    let s1 = snapshot_with_app_chunks(1, "org.example.app", &[(chunk_id, first)]);
    let s2 = snapshot_with_app_chunks(2, "org.example.app", &[(chunk_id, second)]);

    let mut index = BlobIndex::new();
    index.populate(
        &cache,
        &listing_for(&[(chunk_id, first), (chunk_id, second)]),
        &[s1, s2],
    );
    assert_eq!(index.get(&chunk_id), Some(&first));
}

#[test]
fn populate_clears_previous_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (stale_chunk, stale_blob) = synthetic_pair(1, 100);
    let mut index = BlobIndex::new();
    index.save_new_blob(&cache, stale_chunk, stale_blob).unwrap();
    cache.clear_local_cache().unwrap();

    index.populate(&cache, &[], &[]);
    assert!(index.is_empty());
    assert_eq!(index.get(&stale_chunk), None);
}

#[test]
fn save_new_blob_ignores_existing_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (chunk_id, first) = synthetic_pair(1, 100);
    let (_, second) = synthetic_pair(2, 200);

    let mut index = BlobIndex::new();
    index.save_new_blob(&cache, chunk_id, first).unwrap();
    index.save_new_blob(&cache, chunk_id, second).unwrap();

    assert_eq!(index.get(&chunk_id), Some(&first));

    // The persistent log must carry only the first record.
    let mut records = 0;
    let allowed: HashMap<BlobId, u64> =
        [(first.id, first.length), (second.id, second.length)].into_iter().collect();
    cache.load(&allowed, |_, blob| {
        records += 1;
        assert_eq!(blob, first);
    });
    assert_eq!(records, 1);
}

#[test]
fn contains_all_requires_every_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (c1, b1) = synthetic_pair(1, 10);
    let (c2, b2) = synthetic_pair(2, 20);
    let (c3, _) = synthetic_pair(3, 30);

    let mut index = BlobIndex::new();
    index.save_new_blob(&cache, c1, b1).unwrap();
    index.save_new_blob(&cache, c2, b2).unwrap();

    assert!(index.contains_all(&[c1, c2]));
    assert!(!index.contains_all(&[c1, c2, c3]));
    assert!(index.contains_all(&[]));
}

#[test]
fn clear_releases_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BlobCache::new(dir.path()).unwrap();

    let (c1, b1) = synthetic_pair(1, 10);
    let mut index = BlobIndex::new();
    index.save_new_blob(&cache, c1, b1).unwrap();
    assert!(!index.is_empty());

    index.clear();
    assert!(index.is_empty());
    assert_eq!(index.get(&c1), None);
}
