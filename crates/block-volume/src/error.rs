use thiserror::Error;

/// Failures raised by `BlockVolumeWriter` and `IndexAccumulator`.
#[derive(Debug, Error)]
pub enum BlockVolumeError {
    /// `add_block`/`append` called outside the state that accepts it.
    #[error("{operation} requires an open volume, but it is {state}")]
    NotOpen {
        operation: &'static str,
        state: &'static str,
    },

    /// The temp file backing a volume or accumulator could not be created
    /// or written to.
    #[error("temp file I/O failed during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The configured codec rejected or failed to compress a block.
    #[error("compression failed: {0}")]
    Compression(#[source] anyhow::Error),
}

impl BlockVolumeError {
    pub fn not_open(operation: &'static str, state: &'static str) -> Self {
        Self::NotOpen { operation, state }
    }

    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }
}

pub type BlockVolumeResult<T> = std::result::Result<T, BlockVolumeError>;
