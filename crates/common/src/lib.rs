use std::sync::Once;

use serde::{Deserialize, Serialize};

pub mod policy;
pub mod traits;

pub use policy::{CompressionPolicy, IndexFilePolicy, Options};

/// Bound on how much a single block's compressed footprint may grow beyond
/// its logical size before the capacity planner must rotate the volume.
pub const BLOCK_COMPRESSION_OVERHEAD: u64 = 1024;

/// Advisory expansion factor applied to a block's logical size when the
/// capacity planner estimates its worst-case on-disk footprint.
pub const NON_COMPRESSIBLE_EXPANSION_FACTOR: f64 = 1.02;

/// Identity of a remote volume, as assigned by the block index.
///
/// `-1` (`VolumeId::NONE`) is the sentinel the original system used for
/// "no such row"; it is kept as an explicit constant rather than inlined
/// so call sites read as `id.is_none()`, not `id.0 == -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(pub i64);

impl VolumeId {
    pub const NONE: VolumeId = VolumeId(-1);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, globally stable identity of a block's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashKey(pub String);

impl HashKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HashKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The composite key the block index is keyed on: content identity plus
/// logical length (two blocks with the same hash but different declared
/// sizes are distinct rows, matching the original `(hash_key, size)` key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub hash_key: HashKey,
    pub size: u64,
}

impl BlockKey {
    pub fn new(hash_key: HashKey, size: u64) -> Self {
        Self { hash_key, size }
    }
}

/// What kind of object a registered remote volume holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeKind {
    Blocks,
    Index,
}

/// Durability state of a registered remote volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    /// Registered in the index but not yet durably uploaded.
    Temporary,
    /// Upgraded by the uploader once the bytes are confirmed durable.
    Uploaded,
}

/// Initializes the process-wide `tracing` subscriber exactly once.
///
/// Mirrors the teacher's `spacectl::init_tracing`: an `EnvFilter` read from
/// `RUST_LOG` (defaulting to `info`), with the output format switchable via
/// `DATABLOCK_LOG_FORMAT=json` for machine-readable logs in CI.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let format = std::env::var("DATABLOCK_LOG_FORMAT").unwrap_or_else(|_| "compact".into());

        if format.eq_ignore_ascii_case("json") {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .flatten_event(true)
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_none_sentinel() {
        assert!(VolumeId::NONE.is_none());
        assert!(!VolumeId(0).is_none());
        assert_eq!(VolumeId::NONE.0, -1);
    }

    #[test]
    fn block_key_equality_is_by_value() {
        let a = BlockKey::new(HashKey::new("abc"), 10);
        let b = BlockKey::new(HashKey::new("abc"), 10);
        let c = BlockKey::new(HashKey::new("abc"), 11);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
