/// Decides when the current volume is full given the next block's
/// worst-case expansion.
///
/// Grounded on the pack-sizing shape used elsewhere in the ecosystem
/// (`PackSizer::size_ok`): a simple threshold comparison against an
/// advisory growth estimate, not a measured compression pass. `max_size`
/// is expected to already have the header/footer overhead pre-subtracted
/// (`Options::max_volume_size`).
pub struct CapacityPlanner;

impl CapacityPlanner {
    /// `true` iff appending a block of `next_block_size` logical bytes to a
    /// volume currently at `current_file_size` compressed bytes would, in
    /// the worst case, exceed `max_size`.
    pub fn rotate_required(current_file_size: u64, next_block_size: u64, max_size: u64) -> bool {
        let projected = current_file_size as f64
            + next_block_size as f64 * common::NON_COMPRESSIBLE_EXPANSION_FACTOR;
        projected > max_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_untouched_volume() {
        assert!(!CapacityPlanner::rotate_required(0, 8000, 8976));
    }

    #[test]
    fn rotation_scenario_from_spec() {
        // After block A (8000 logical bytes): file_size ~= 8160.
        let after_a = (8000_f64 * common::NON_COMPRESSIBLE_EXPANSION_FACTOR) as u64;
        assert!(!CapacityPlanner::rotate_required(0, 8000, 8976));
        assert!(CapacityPlanner::rotate_required(after_a, 2000, 8976));
    }
}
