use thiserror::Error;

/// Failures surfaced by a `BlockIndexClient` implementation.
///
/// The durable schema behind a real implementation (SQL tables, migrations,
/// connection pooling) is out of scope for this crate; every variant here is
/// what the Pipeline Core needs to decide "is this fatal", not how a
/// specific backend represents its own internals.
#[derive(Debug, Error)]
pub enum BlockIndexError {
    /// The backing database rejected or failed an operation. Always fatal
    /// to the calling pipeline shard.
    #[error("block index operation `{operation}` failed: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// `move_block_to_volume` was called with a `from_volume_id` that no
    /// longer matches the row's current volume — another shard already
    /// moved it, or the row doesn't exist.
    #[error("block ({hash_key}, {size}) is not owned by volume {expected}")]
    StaleVolume {
        hash_key: String,
        size: u64,
        expected: common::VolumeId,
    },

    /// A backend returned state that violates the index's own invariants
    /// (e.g. a negative volume id from `register_remote_volume`).
    #[error("block index invariant violated: {0}")]
    Invariant(String),
}

pub type BlockIndexResult<T> = std::result::Result<T, BlockIndexError>;
