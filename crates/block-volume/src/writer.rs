use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use common::traits::Compressor;
use common::{CompressionPolicy, HashKey, VolumeId};
use compression::Lz4ZstdCompressor;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::error::{BlockVolumeError, BlockVolumeResult};

/// A block volume after `close()`: the immutable summary handed to the
/// uploader. Holds a shared handle onto the backing temp file so the
/// bytes remain readable even after the writer that produced them is
/// disposed — the file is only actually removed once every `ClosedVolume`
/// clone and the writer itself have been dropped.
#[derive(Clone)]
pub struct ClosedVolume {
    pub volume_id: VolumeId,
    pub remote_filename: String,
    pub source_size: u64,
    pub file_size: u64,
    file: Arc<NamedTempFile>,
}

impl ClosedVolume {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Opens an independent, rewound handle onto the volume's bytes.
    pub fn open_reader(&self) -> std::io::Result<File> {
        self.file.reopen()
    }
}

impl std::fmt::Debug for ClosedVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedVolume")
            .field("volume_id", &self.volume_id)
            .field("remote_filename", &self.remote_filename)
            .field("source_size", &self.source_size)
            .field("file_size", &self.file_size)
            .finish()
    }
}

enum State {
    Open(NamedTempFile),
    Closed(Arc<NamedTempFile>, ClosedVolume),
    Disposed,
}

/// Append-only compressed container holding raw blocks; tracks on-disk
/// (compressed) size and logical source size. The only component that
/// knows the compression format — to the capacity planner it is a black
/// box with a monotone cost bound.
pub struct BlockVolumeWriter {
    volume_id: VolumeId,
    remote_filename: String,
    source_size: u64,
    file_size: u64,
    compressor: Arc<dyn Compressor>,
    state: State,
}

impl BlockVolumeWriter {
    /// Constructs a fresh *Open* volume on a locally scoped temp file.
    pub fn open(volume_id: VolumeId, remote_filename: impl Into<String>) -> BlockVolumeResult<Self> {
        let file = NamedTempFile::new().map_err(|e| BlockVolumeError::io("open", e))?;
        Ok(Self {
            volume_id,
            remote_filename: remote_filename.into(),
            source_size: 0,
            file_size: 0,
            compressor: Arc::new(Lz4ZstdCompressor::new()),
            state: State::Open(file),
        })
    }

    pub fn volume_id(&self) -> VolumeId {
        self.volume_id
    }

    pub fn remote_filename(&self) -> &str {
        &self.remote_filename
    }

    /// Cumulative uncompressed bytes accepted. Readable in every state.
    pub fn source_size(&self) -> u64 {
        self.source_size
    }

    /// Current compressed on-disk size. Readable in every state.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    fn state_name(&self) -> &'static str {
        match &self.state {
            State::Open(_) => "open",
            State::Closed(..) => "closed",
            State::Disposed => "disposed",
        }
    }

    /// Appends `data[offset..offset+size]`, compressed under `hint`.
    /// Only callable while *Open*.
    #[instrument(skip(self, data, hint), fields(volume_id = %self.volume_id))]
    pub fn add_block(
        &mut self,
        hash_key: &HashKey,
        data: &Bytes,
        offset: u64,
        size: u64,
        hint: &CompressionPolicy,
    ) -> BlockVolumeResult<()> {
        let file = match &mut self.state {
            State::Open(f) => f,
            _ => return Err(BlockVolumeError::not_open("add_block", self.state_name())),
        };

        let start = offset as usize;
        let end = start + size as usize;
        let slice = &data[start..end];

        let (compressed, _summary) = self
            .compressor
            .compress(slice, hint)
            .map_err(BlockVolumeError::Compression)?;

        file.write_all(&compressed)
            .map_err(|e| BlockVolumeError::io("add_block", e))?;

        let predicted_cap = (size as f64 * common::NON_COMPRESSIBLE_EXPANSION_FACTOR) as u64
            + common::BLOCK_COMPRESSION_OVERHEAD;
        let actual_growth = compressed.len() as u64;
        if actual_growth > predicted_cap {
            warn!(
                hash_key = %hash_key,
                predicted_cap,
                actual_growth,
                "block compressed growth exceeded the advisory bound; volume may exceed its target size"
            );
        }

        self.source_size += size;
        self.file_size += actual_growth;
        debug!(
            hash_key = %hash_key,
            source_size = self.source_size,
            file_size = self.file_size,
            "appended block"
        );
        Ok(())
    }

    /// Finalises the volume and moves to *Closed*. Idempotent.
    pub fn close(&mut self) -> BlockVolumeResult<ClosedVolume> {
        if let State::Closed(_, closed) = &self.state {
            return Ok(closed.clone());
        }
        if matches!(self.state, State::Disposed) {
            return Err(BlockVolumeError::not_open("close", "disposed"));
        }

        let file = match std::mem::replace(&mut self.state, State::Disposed) {
            State::Open(f) => Arc::new(f),
            _ => unreachable!("checked above"),
        };

        let closed = ClosedVolume {
            volume_id: self.volume_id,
            remote_filename: self.remote_filename.clone(),
            source_size: self.source_size,
            file_size: self.file_size,
            file: file.clone(),
        };
        self.state = State::Closed(file, closed.clone());
        debug!(volume_id = %self.volume_id, file_size = closed.file_size, "closed volume");
        Ok(closed)
    }

    /// Releases this writer's handle on the temp storage. After dispose,
    /// the writer is gone — enforced by consuming `self`. The underlying
    /// file is only removed once every `ClosedVolume` handed out by
    /// `close()` has also been dropped.
    pub fn dispose(self) {
        // Dropping the Arc<NamedTempFile>/NamedTempFile (if any) releases
        // this writer's reference; actual unlink happens when the last
        // owner (writer or any ClosedVolume clone) drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CompressionPolicy;

    fn open_writer() -> BlockVolumeWriter {
        BlockVolumeWriter::open(VolumeId(1), "vol-0001").unwrap()
    }

    #[test]
    fn add_block_tracks_source_and_file_size() {
        let mut writer = open_writer();
        let data = Bytes::from(vec![b'x'; 1000]);
        writer
            .add_block(
                &HashKey::new("A"),
                &data,
                0,
                1000,
                &CompressionPolicy::LZ4 { level: 1 },
            )
            .unwrap();

        assert_eq!(writer.source_size(), 1000);
        assert!(writer.file_size() > 0);
    }

    #[test]
    fn add_block_after_close_is_rejected() {
        let mut writer = open_writer();
        writer.close().unwrap();

        let data = Bytes::from_static(b"too late");
        let err = writer
            .add_block(&HashKey::new("A"), &data, 0, 8, &CompressionPolicy::None)
            .unwrap_err();
        assert!(matches!(err, BlockVolumeError::NotOpen { .. }));
    }

    #[test]
    fn close_is_idempotent() {
        let mut writer = open_writer();
        let first = writer.close().unwrap();
        let second = writer.close().unwrap();
        assert_eq!(first.file_size, second.file_size);
        assert_eq!(first.path(), second.path());
    }

    #[test]
    fn dispose_leaves_file_alive_while_closed_volume_is_held() {
        let mut writer = open_writer();
        let closed = writer.close().unwrap();
        let path = closed.path().to_path_buf();
        assert!(path.exists());

        writer.dispose();
        assert!(path.exists(), "ClosedVolume keeps the file alive");

        drop(closed);
        assert!(!path.exists(), "last handle dropping removes the file");
    }
}
