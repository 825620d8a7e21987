//! Compiled binary cache container format
//!
//! One container holds the key/value records a single device run wrote.
//! Layout, little-endian with no padding:
//!
//! ```text
//! record_count : u64
//! record_count times:
//!     key_length   : i32
//!     key          : key_length bytes
//!     value_length : i32
//!     value        : value_length bytes
//! ```

use super::cursor::{ByteCursor, CursorError};
use crate::error::{DevfarmError, DevfarmResult};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Ordered key/value records of one container.
///
/// Iteration follows first insertion; overwriting a key keeps its slot,
/// so encoding is deterministic for a deterministic sequence of inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRecords {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    index: HashMap<Vec<u8>, usize>,
}

impl CacheRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.index.get(key).map(|&i| self.entries[i].1.as_slice())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite a record, returning the previous value
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Decode a container. A key repeated inside one buffer keeps its
    /// last value. Bytes after the declared records are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, CursorError> {
        let mut cursor = ByteCursor::new(bytes);
        let count = cursor.read_u64_le()?;

        // every record needs at least its two length fields
        let plausible = (cursor.remaining() / 8).min(usize::try_from(count).unwrap_or(usize::MAX));
        let mut records = Self {
            entries: Vec::with_capacity(plausible),
            index: HashMap::with_capacity(plausible),
        };

        for _ in 0..count {
            let key = cursor.read_prefixed()?;
            let value = cursor.read_prefixed()?;
            records.insert(key.to_vec(), value.to_vec());
        }

        if cursor.remaining() > 0 {
            warn!(
                "Ignoring {} trailing bytes after {} records",
                cursor.remaining(),
                count
            );
        }
        Ok(records)
    }

    /// Encode the records. Fails if a key or value does not fit an i32 length.
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        let body: usize = self.entries.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
        let mut out = Vec::with_capacity(8 + body);

        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for (key, value) in &self.entries {
            put_prefixed(&mut out, key, "key")?;
            put_prefixed(&mut out, value, "value")?;
        }
        Ok(out)
    }
}

fn put_prefixed(out: &mut Vec<u8>, bytes: &[u8], what: &str) -> Result<(), String> {
    let len = i32::try_from(bytes.len())
        .map_err(|_| format!("{} of {} bytes exceeds the 4-byte length field", what, bytes.len()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Read and validate one container file
pub fn read_container(path: &Path) -> DevfarmResult<CacheRecords> {
    let bytes = fs::read(path)
        .map_err(|e| DevfarmError::io(format!("reading binary cache {}", path.display()), e))?;
    decode_file(path, &bytes)
}

pub(crate) fn decode_file(path: &Path, bytes: &[u8]) -> DevfarmResult<CacheRecords> {
    let records =
        CacheRecords::decode(bytes).map_err(|e| DevfarmError::malformed(path, e.to_string()))?;
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Write `records` to `path`, creating parent directories.
///
/// The data goes to a sibling temporary file first and is renamed into
/// place, so a failed write leaves any existing file untouched.
pub fn write_container(records: &CacheRecords, path: &Path) -> DevfarmResult<()> {
    let bytes = records
        .encode()
        .map_err(|reason| DevfarmError::malformed(path, reason))?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .map_err(|e| DevfarmError::io(format!("creating directory {}", parent.display()), e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| DevfarmError::User(format!("not a file path: {}", path.display())))?;
    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = fs::write(&tmp_path, &bytes).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = result {
        let _ = remove_if_present(&tmp_path);
        return Err(DevfarmError::io(
            format!("writing binary cache {}", path.display()),
            e,
        ));
    }

    debug!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records(pairs: &[(&[u8], &[u8])]) -> CacheRecords {
        let mut r = CacheRecords::new();
        for (k, v) in pairs {
            r.insert(k.to_vec(), v.to_vec());
        }
        r
    }

    #[test]
    fn encodes_documented_layout() {
        let bytes = records(&[(b"ab", b"\x01\x02\x03")]).encode().unwrap();
        let mut expected = 1u64.to_le_bytes().to_vec();
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(b"ab");
        expected.extend_from_slice(&3i32.to_le_bytes());
        expected.extend_from_slice(&[1, 2, 3]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn file_roundtrip_preserves_order_and_binary_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("cache.bin");
        let original = records(&[
            (b"conv2d_3x3", &[0x00, 0xff, 0x10, 0x00]),
            (b"\x00\x01binary-key", b""),
            (b"platform", b"OpenCL 2.0 Adreno"),
        ]);

        write_container(&original, &path).unwrap();
        let loaded = read_container(&path).unwrap();

        assert_eq!(loaded, original);
        let keys: Vec<&[u8]> = loaded.iter().map(|(k, _)| k).collect();
        assert_eq!(keys[0], b"conv2d_3x3");
        assert_eq!(keys[2], b"platform");
    }

    #[test]
    fn empty_container_is_just_a_count() {
        let bytes = CacheRecords::new().encode().unwrap();
        assert_eq!(bytes, 0u64.to_le_bytes());
        assert!(CacheRecords::decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn repeated_key_in_one_file_keeps_last_value_and_first_slot() {
        let mut bytes = 3u64.to_le_bytes().to_vec();
        for (k, v) in [(b"k", b"1"), (b"j", b"2"), (b"k", b"3")] {
            bytes.extend_from_slice(&1i32.to_le_bytes());
            bytes.extend_from_slice(k);
            bytes.extend_from_slice(&1i32.to_le_bytes());
            bytes.extend_from_slice(v);
        }

        let decoded = CacheRecords::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get(b"k"), Some(&b"3"[..]));
        assert_eq!(decoded.iter().next().unwrap().0, b"k");
    }

    #[test]
    fn count_larger_than_records_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("truncated.bin");
        let mut bytes = records(&[(b"k", b"v")]).encode().unwrap();
        bytes[..8].copy_from_slice(&2u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let err = read_container(&path).unwrap_err();
        match err {
            DevfarmError::MalformedContainer { path: p, reason } => {
                assert_eq!(p, path);
                assert!(reason.contains("unexpected end of data"), "{reason}");
            }
            other => panic!("expected MalformedContainer, got {other:?}"),
        }
    }

    #[test]
    fn truncated_value_is_malformed() {
        let mut bytes = records(&[(b"key", b"value")]).encode().unwrap();
        bytes.truncate(bytes.len() - 2);
        assert!(CacheRecords::decode(&bytes).is_err());
    }

    #[test]
    fn short_header_is_malformed() {
        assert!(CacheRecords::decode(&[]).is_err());
        assert!(CacheRecords::decode(&[1, 0, 0]).is_err());
    }

    #[test]
    fn huge_count_does_not_preallocate() {
        let bytes = u64::MAX.to_le_bytes();
        assert!(matches!(
            CacheRecords::decode(&bytes),
            Err(CursorError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = records(&[(b"k", b"v")]).encode().unwrap();
        bytes.extend_from_slice(b"junk");
        let decoded = CacheRecords::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn write_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        fs::write(&path, b"stale contents that are longer than the new file").unwrap();

        write_container(&records(&[(b"k", b"v")]), &path).unwrap();

        assert_eq!(read_container(&path).unwrap().get(b"k"), Some(&b"v"[..]));
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
