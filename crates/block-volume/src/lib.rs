//! Block packing: the compressed container (C2), its paired blocklist
//! index (C3), and the capacity planner (C4) that decides when a
//! container is full.

mod accumulator;
mod capacity;
mod error;
mod writer;

pub use accumulator::{decode_entries, IndexAccumulator, IndexEntry};
pub use capacity::CapacityPlanner;
pub use error::{BlockVolumeError, BlockVolumeResult};
pub use writer::{BlockVolumeWriter, ClosedVolume};
