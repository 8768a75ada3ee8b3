use serde::{Deserialize, Serialize};

/// Compression algorithm selection, passed opaquely from the options surface
/// down to the block volume writer as the original spec's "compression
/// hint".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CompressionPolicy {
    /// No compression.
    None,
    /// LZ4 fast compression (level 1-16).
    LZ4 { level: i32 },
    /// Zstd balanced compression (level -5..=22).
    Zstd { level: i32 },
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        CompressionPolicy::LZ4 { level: 1 }
    }
}

/// Whether the pipeline accumulates a blocklist index alongside each block
/// volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFilePolicy {
    /// No index accumulator is kept.
    None,
    /// Reserved for a future lookup-only mode; behaves like `None` here.
    Lookup,
    /// An `IndexAccumulator` travels with every block volume.
    Full,
}

impl Default for IndexFilePolicy {
    fn default() -> Self {
        IndexFilePolicy::None
    }
}

/// Runtime configuration consumed by the block processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Target maximum compressed volume size, in bytes.
    pub volume_size: u64,

    /// Whether to accumulate a blocklist index per volume.
    pub index_file_policy: IndexFilePolicy,

    /// Compression algorithm/level handed to the block volume writer.
    pub compression: CompressionPolicy,
}

impl Options {
    pub fn new(volume_size: u64) -> Self {
        Self {
            volume_size,
            index_file_policy: IndexFilePolicy::default(),
            compression: CompressionPolicy::default(),
        }
    }

    /// The threshold the capacity planner rotates against: the configured
    /// volume size minus the worst-case header/footer overhead C2 adds when
    /// it closes the volume.
    pub fn max_volume_size(&self) -> u64 {
        self.volume_size
            .saturating_sub(crate::BLOCK_COMPRESSION_OVERHEAD)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(50 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_volume_size_subtracts_overhead() {
        let options = Options::new(10_000);
        assert_eq!(options.max_volume_size(), 10_000 - crate::BLOCK_COMPRESSION_OVERHEAD);
    }

    #[test]
    fn default_policies_match_teacher_defaults() {
        assert_eq!(CompressionPolicy::default(), CompressionPolicy::LZ4 { level: 1 });
        assert_eq!(IndexFilePolicy::default(), IndexFilePolicy::None);
    }

    #[test]
    fn options_round_trip_through_json() {
        let mut options = Options::new(123_456);
        options.index_file_policy = IndexFilePolicy::Full;
        options.compression = CompressionPolicy::Zstd { level: 9 };

        let encoded = serde_json::to_string(&options).unwrap();
        let decoded: Options = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.volume_size, options.volume_size);
        assert_eq!(decoded.index_file_policy, options.index_file_policy);
        assert_eq!(decoded.compression, options.compression);
    }
}
