use thiserror::Error;

use block_index::BlockIndexError;
use block_volume::BlockVolumeError;

/// Failures raised by the Pipeline Core's main loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The Task Reader signalled a user-initiated abort. Any open volume
    /// has already been disposed, not emitted, by the time this surfaces.
    #[error("pipeline terminated by operator request")]
    Terminated,

    /// A block index operation failed. Fatal to this shard.
    #[error("block index failure: {0}")]
    Index(#[from] BlockIndexError),

    /// A block volume operation failed.
    #[error("block volume failure: {0}")]
    Volume(#[from] BlockVolumeError),

    /// Output or SpillPickup channel was closed or full beyond what the
    /// caller expected. Fatal.
    #[error("channel send failed: {0}")]
    Channel(String),

    /// A collaborator returned state that violates this crate's own
    /// invariants (e.g. a negative volume id surfacing from a hand-rolled
    /// `BlockIndexClient`).
    #[error("pipeline invariant violated: {0}")]
    Invariant(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
