use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use granary_types::blob_id::BlobId;
use granary_types::chunk_id::ChunkId;

use crate::error::{GranaryError, Result};
use crate::snapshot::BlobDescriptor;

/// File name of the append-only chunk-to-blob record log.
const CACHE_FILE_NAME: &str = "blobsCache";

/// File name of the quarantine list: raw 32-byte blob IDs, no framing.
const QUARANTINE_FILE_NAME: &str = "doNotUseBlobs";

/// Upper bound for one serialized descriptor. A varint beyond this is
/// treated as log corruption, not a huge record.
const MAX_RECORD_LEN: u64 = 1024 * 1024;

/// Persistent blob cache: the on-disk survivors of a backup run.
///
/// Two files under one directory. The cache log remembers which chunks
/// were uploaded as which blobs, so an interrupted backup never
/// re-uploads data the backend already holds. The quarantine remembers
/// blobs whose content failed verification, so they are never reused.
///
/// Both files are best-effort accelerators: every read path here
/// degrades to "less cache" rather than an error.
pub struct BlobCache {
    dir: PathBuf,
}

impl BlobCache {
    /// Open a cache rooted at the given directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open the cache in the platform cache directory, or an explicit
    /// override (from `CheckerConfig::cache_dir`).
    pub fn open(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::new(dir),
            None => {
                let base = dirs::cache_dir()
                    .ok_or_else(|| GranaryError::Other("no cache directory available".into()))?;
                Self::new(base.join("granary"))
            }
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE_NAME)
    }

    fn quarantine_path(&self) -> PathBuf {
        self.dir.join(QUARANTINE_FILE_NAME)
    }

    // -----------------------------------------------------------------
    // Cache log
    // -----------------------------------------------------------------

    /// Append one `(chunk, blob)` record to the cache log.
    ///
    /// Record layout: 32 raw ChunkId bytes, an unsigned LEB128 byte
    /// count, then that many bytes of the serialized descriptor.
    /// Duplicate appends are tolerated; the loader resolves them.
    pub fn save_new_blob(&self, chunk_id: &ChunkId, blob: &BlobDescriptor) -> Result<()> {
        let bytes = rmp_serde::to_vec(blob)?;
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.cache_path())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(chunk_id.as_bytes())?;
        write_varint(&mut writer, bytes.len() as u64)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Delete the cache log, e.g. after a completed backup run or when
    /// the storage target changes.
    pub fn clear_local_cache(&self) -> Result<()> {
        match fs::remove_file(self.cache_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream cache records into `sink`, keeping only entries whose
    /// blob the backend still reports at the recorded length.
    ///
    /// A truncated trailing record ends the stream without error, and
    /// any parse failure keeps the readable prefix: losing cache
    /// entries costs at most duplicate uploads.
    pub fn load(
        &self,
        allowed: &HashMap<BlobId, u64>,
        mut sink: impl FnMut(ChunkId, BlobDescriptor),
    ) {
        let file = match File::open(self.cache_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(error = %e, "failed to open blob cache log");
                return;
            }
        };
        let mut reader = BufReader::new(file);
        let mut kept = 0usize;
        let mut dropped = 0usize;

        loop {
            let mut id = [0u8; 32];
            match read_exact_or_eof(&mut reader, &mut id) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "blob cache log ends mid-record, keeping prefix");
                    break;
                }
            }
            let len = match read_varint(&mut reader) {
                Ok(len) if len <= MAX_RECORD_LEN => len,
                Ok(len) => {
                    warn!(len, "blob cache record length implausible, keeping prefix");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "blob cache log ends mid-record, keeping prefix");
                    break;
                }
            };
            let mut buf = vec![0u8; len as usize];
            if let Err(e) = reader.read_exact(&mut buf) {
                warn!(error = %e, "blob cache log ends mid-record, keeping prefix");
                break;
            }
            let blob: BlobDescriptor = match rmp_serde::from_slice(&buf) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(error = %e, "undecodable blob cache record, keeping prefix");
                    break;
                }
            };

            if allowed.get(&blob.id) == Some(&blob.length) {
                sink(ChunkId(id), blob);
                kept += 1;
            } else {
                warn!(blob = %blob.id, length = blob.length, "cached blob no longer on backend, dropping");
                dropped += 1;
            }
        }

        debug!(kept, dropped, "loaded blob cache log");
    }

    // -----------------------------------------------------------------
    // Quarantine
    // -----------------------------------------------------------------

    /// Record a blob whose content failed verification. It will be
    /// excluded from every future index population.
    pub fn do_not_use_blob(&self, id: &BlobId) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.quarantine_path())?;
        file.write_all(id.as_bytes())?;
        Ok(())
    }

    /// Read the quarantine as a set of hex blob IDs.
    ///
    /// The file is raw 32-byte IDs; a partial trailing read or any I/O
    /// error means corruption, in which case the file is deleted and
    /// whatever was read before the failure is returned.
    pub fn get_quarantine(&self) -> HashSet<String> {
        let path = self.quarantine_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashSet::new(),
            Err(e) => {
                warn!(error = %e, "failed to open quarantine, deleting");
                let _ = fs::remove_file(&path);
                return HashSet::new();
            }
        };
        let mut reader = BufReader::new(file);
        let mut out = HashSet::new();
        loop {
            let mut id = [0u8; 32];
            match read_exact_or_eof(&mut reader, &mut id) {
                Ok(true) => {
                    out.insert(hex::encode(id));
                }
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "quarantine corrupt, deleting");
                    let _ = fs::remove_file(&path);
                    break;
                }
            }
        }
        out
    }

    /// Drop pruned blobs from the quarantine after the pruner deleted
    /// them from the backend. Rewrites atomically via temp + rename.
    pub fn on_blobs_removed(&self, removed: &HashSet<String>) -> Result<()> {
        let path = self.quarantine_path();
        if !path.exists() {
            return Ok(());
        }
        let survivors: Vec<String> = self
            .get_quarantine()
            .into_iter()
            .filter(|id_hex| !removed.contains(id_hex))
            .collect();

        // get_quarantine deletes the file when it finds corruption;
        // nothing left to rewrite in that case.
        if !path.exists() && survivors.is_empty() {
            return Ok(());
        }

        let tmp_path = path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for id_hex in &survivors {
            let bytes = hex::decode(id_hex)
                .map_err(|e| GranaryError::InvalidFormat(format!("quarantine entry: {e}")))?;
            writer.write_all(&bytes)?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp_path, &path)?;

        debug!(survivors = survivors.len(), "rewrote quarantine");
        Ok(())
    }
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on clean EOF before the
/// first byte; `UnexpectedEof` when the stream ends mid-buffer.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }
    Ok(true)
}

fn write_varint(writer: &mut impl Write, mut value: u64) -> std::io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

fn read_varint(reader: &mut impl Read) -> std::io::Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                "varint overflows u64",
            ));
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod varint_tests {
    use super::*;

    fn roundtrip(value: u64) -> u64 {
        let mut buf = Vec::new();
        write_varint(&mut buf, value).unwrap();
        read_varint(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn varint_roundtrip() {
        for value in [0, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
            assert_eq!(roundtrip(value), value);
        }
    }

    #[test]
    fn varint_single_byte_below_128() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 127).unwrap();
        assert_eq!(buf, vec![127]);

        buf.clear();
        write_varint(&mut buf, 128).unwrap();
        assert_eq!(buf, vec![0x80, 0x01]);
    }

    #[test]
    fn varint_eof_is_error() {
        assert!(read_varint(&mut [].as_slice()).is_err());
        // Continuation bit set but no next byte.
        assert!(read_varint(&mut [0x80u8].as_slice()).is_err());
    }

    #[test]
    fn varint_overlong_is_error() {
        let overlong = [0xffu8; 11];
        assert!(read_varint(&mut overlong.as_slice()).is_err());
    }
}
