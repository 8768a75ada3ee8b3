use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use common::HashKey;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{BlockVolumeError, BlockVolumeResult};

/// One blocklist-hash entry: the hash and size of a child block, plus the
/// raw bytes of the blocklist payload it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash_key: HashKey,
    pub size: u64,
    pub payload: Bytes,
}

enum State {
    Open(NamedTempFile),
    Disposed,
}

/// Spill-to-disk sequence of blocklist-hash entries, bound 1:1 to the
/// currently open block volume. Recreated fresh on every rotation.
pub struct IndexAccumulator {
    state: State,
    len: usize,
}

impl IndexAccumulator {
    pub fn open() -> BlockVolumeResult<Self> {
        let file = NamedTempFile::new().map_err(|e| BlockVolumeError::io("open", e))?;
        Ok(Self {
            state: State::Open(file),
            len: 0,
        })
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append(&mut self, entry: &IndexEntry) -> BlockVolumeResult<()> {
        let file = match &mut self.state {
            State::Open(f) => f,
            State::Disposed => return Err(BlockVolumeError::not_open("append", "disposed")),
        };

        let hash_bytes = entry.hash_key.as_str().as_bytes();
        file.write_all(&(hash_bytes.len() as u32).to_le_bytes())
            .map_err(|e| BlockVolumeError::io("append", e))?;
        file.write_all(hash_bytes)
            .map_err(|e| BlockVolumeError::io("append", e))?;
        file.write_all(&entry.size.to_le_bytes())
            .map_err(|e| BlockVolumeError::io("append", e))?;
        file.write_all(&entry.payload)
            .map_err(|e| BlockVolumeError::io("append", e))?;

        self.len += 1;
        debug!(hash_key = %entry.hash_key, entries = self.len, "accumulated blocklist entry");
        Ok(())
    }

    /// Hands the accumulated bytes to the caller (the uploader) as a
    /// rewound, independently readable file handle.
    pub fn into_reader(self) -> BlockVolumeResult<File> {
        match self.state {
            State::Open(tmp) => {
                let mut file = tmp
                    .reopen()
                    .map_err(|e| BlockVolumeError::io("into_reader", e))?;
                file.seek(SeekFrom::Start(0))
                    .map_err(|e| BlockVolumeError::io("into_reader", e))?;
                Ok(file)
            }
            State::Disposed => Err(BlockVolumeError::not_open("into_reader", "disposed")),
        }
    }

    /// Releases the backing temp file without exposing its contents.
    pub fn dispose(self) {
        // Dropping the NamedTempFile deletes the underlying file.
    }
}

/// Decodes a full accumulator stream back into its entries, in the order
/// they were appended. Used by tests and by uploaders that want to
/// enumerate the blocklist in-process rather than stream it.
pub fn decode_entries(mut reader: impl Read) -> BlockVolumeResult<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(BlockVolumeError::io("decode_entries", e)),
        }
        let hash_len = u32::from_le_bytes(len_buf) as usize;

        let mut hash_buf = vec![0u8; hash_len];
        reader
            .read_exact(&mut hash_buf)
            .map_err(|e| BlockVolumeError::io("decode_entries", e))?;
        let hash_key = HashKey::new(String::from_utf8_lossy(&hash_buf).into_owned());

        let mut size_buf = [0u8; 8];
        reader
            .read_exact(&mut size_buf)
            .map_err(|e| BlockVolumeError::io("decode_entries", e))?;
        let size = u64::from_le_bytes(size_buf);

        let mut payload = vec![0u8; size as usize];
        reader
            .read_exact(&mut payload)
            .map_err(|e| BlockVolumeError::io("decode_entries", e))?;

        entries.push(IndexEntry {
            hash_key,
            size,
            payload: Bytes::from(payload),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_entries_in_arrival_order() {
        let mut accum = IndexAccumulator::open().unwrap();
        accum
            .append(&IndexEntry {
                hash_key: HashKey::new("C"),
                size: 512,
                payload: Bytes::from_static(b"child-hash-bytes"),
            })
            .unwrap();
        accum
            .append(&IndexEntry {
                hash_key: HashKey::new("D"),
                size: 3,
                payload: Bytes::from_static(b"xyz"),
            })
            .unwrap();

        assert_eq!(accum.len(), 2);
        let file = accum.into_reader().unwrap();
        let decoded = decode_entries(file).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].hash_key, HashKey::new("C"));
        assert_eq!(decoded[0].payload.as_ref(), b"child-hash-bytes");
        assert_eq!(decoded[1].hash_key, HashKey::new("D"));
    }

    #[test]
    fn dispose_releases_backing_file_without_panicking() {
        let accum = IndexAccumulator::open().unwrap();
        accum.dispose();
    }
}
