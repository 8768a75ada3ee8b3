use std::borrow::Cow;

use anyhow::Result;

use crate::CompressionPolicy;

/// Summary information produced by a compression engine.
#[derive(Debug, Clone)]
pub struct CompressionSummary {
    pub original_size: usize,
    pub output_size: usize,
    pub algorithm: String,
    pub compressed: bool,
    pub reused_input: bool,
    pub reason: Option<String>,
}

impl CompressionSummary {
    pub fn new(original_size: usize, output_size: usize, algorithm: impl Into<String>) -> Self {
        Self {
            original_size,
            output_size,
            algorithm: algorithm.into(),
            compressed: output_size < original_size,
            reused_input: false,
            reason: None,
        }
    }

    pub fn ratio(&self) -> f32 {
        if self.output_size == 0 {
            return 1.0;
        }
        self.original_size as f32 / self.output_size as f32
    }
}

/// Trait implemented by compression engines; the block volume writer (C2)
/// treats any implementor as a black box with the monotone cost bound
/// described in the capacity planner's contract.
pub trait Compressor: Send + Sync {
    fn compress<'a>(
        &'a self,
        data: &'a [u8],
        policy: &CompressionPolicy,
    ) -> Result<(Cow<'a, [u8]>, CompressionSummary)>;

    fn decompress(&self, data: &[u8], algorithm: &str) -> Result<Vec<u8>>;

    fn supports_algorithm(&self, algorithm: &str) -> bool {
        let _ = algorithm;
        false
    }
}
