use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte chunk identifier: the BLAKE2b-256 hash of the plaintext chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub [u8; 32]);

impl ChunkId {
    /// Compute the chunk ID for a plaintext chunk.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = ChunkIdHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hex-encode the full chunk ID.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a ChunkId from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(ChunkId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Incremental chunk-ID computation for callers that stream their input.
pub struct ChunkIdHasher(Blake2b256);

impl ChunkIdHasher {
    pub fn new() -> Self {
        Self(Blake2b256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> ChunkId {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.finalize());
        ChunkId(out)
    }
}

impl Default for ChunkIdHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_deterministic() {
        let data = b"hello world";
        let id1 = ChunkId::compute(data);
        let id2 = ChunkId::compute(data);
        assert_eq!(id1, id2);
    }

    #[test]
    fn compute_different_data_different_id() {
        let id1 = ChunkId::compute(b"hello");
        let id2 = ChunkId::compute(b"world");
        assert_ne!(id1, id2);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data = b"streaming chunk id computation";
        let mut hasher = ChunkIdHasher::new();
        hasher.update(&data[..10]);
        hasher.update(&data[10..]);
        assert_eq!(hasher.finalize(), ChunkId::compute(data));
    }

    #[test]
    fn to_hex_length() {
        let id = ChunkId::compute(b"test");
        assert_eq!(id.to_hex().len(), 64);
    }

    #[test]
    fn from_hex_roundtrip() {
        let id = ChunkId::compute(b"roundtrip");
        assert_eq!(ChunkId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(ChunkId::from_hex("abcd").is_err());
        assert!(ChunkId::from_hex("zz").is_err());
    }

    #[test]
    fn empty_data_produces_valid_id() {
        let id = ChunkId::compute(b"");
        assert_eq!(id.to_hex().len(), 64);
        assert_ne!(id.0, [0u8; 32]);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ChunkId::compute(b"serde roundtrip");
        let serialized = rmp_serde::to_vec(&id).unwrap();
        let deserialized: ChunkId = rmp_serde::from_slice(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }
}
