//! Contiguous weight storage.

use std::sync::Arc;

use super::{Addressing, DefaultInit};

/// Dense parameter store: one flat buffer of `2^num_bits` blocks.
///
/// The buffer is held behind an [`Arc`] so [`shallow_copy`] adoption shares
/// memory instead of copying; a store whose buffer is shared is read-only
/// and any write panics.
///
/// [`shallow_copy`]: crate::params::Parameters::shallow_copy
#[derive(Debug, Clone)]
pub struct DenseParameters {
    weights: Arc<Vec<f32>>,
    addressing: Addressing,
    seeded: bool,
}

impl DenseParameters {
    /// Allocate a zeroed store. Allocation failure is fatal.
    pub fn new(num_bits: u32, stride_shift: u32) -> Self {
        let addressing = Addressing::new(num_bits, stride_shift);
        let len = (1usize << num_bits) << stride_shift;
        Self {
            weights: Arc::new(vec![0.0; len]),
            addressing,
            seeded: false,
        }
    }

    #[inline]
    pub(crate) fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Whether this store adopted another store's buffer.
    #[inline]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Block containing raw weight-space index `idx`.
    #[inline]
    pub fn block(&self, idx: u64) -> &[f32] {
        let start = self.addressing.block_start(idx);
        let stride = self.addressing.stride() as usize;
        &self.weights[start..start + stride]
    }

    /// Mutable block containing raw weight-space index `idx`.
    ///
    /// # Panics
    ///
    /// Panics if the store is seeded.
    #[inline]
    pub fn block_mut(&mut self, idx: u64) -> &mut [f32] {
        assert!(!self.seeded, "write through a seeded parameter store");
        let start = self.addressing.block_start(idx);
        let stride = self.addressing.stride() as usize;
        let weights = Arc::get_mut(&mut self.weights)
            .expect("parameter store buffer is shared by a seeded copy");
        &mut weights[start..start + stride]
    }

    /// Run an initializer over every block, once.
    ///
    /// The dense backing has no lazy creation path, so registration applies
    /// the initializer eagerly instead of storing it.
    pub fn apply_default(&mut self, mut init: DefaultInit) {
        assert!(!self.seeded, "write through a seeded parameter store");
        let stride = self.addressing.stride() as usize;
        let weights = Arc::get_mut(&mut self.weights)
            .expect("parameter store buffer is shared by a seeded copy");
        for (id, block) in weights.chunks_exact_mut(stride).enumerate() {
            init(block, id as u64);
        }
    }

    /// Share this store's buffer into a read-only copy.
    pub fn seeded_clone(&self) -> Self {
        Self {
            weights: Arc::clone(&self.weights),
            addressing: self.addressing,
            seeded: true,
        }
    }

    /// Blocks with any non-zero scalar, in block-id order.
    pub fn nonzero_blocks(&self) -> Vec<(u64, &[f32])> {
        let stride = self.addressing.stride() as usize;
        self.weights
            .chunks_exact(stride)
            .enumerate()
            .filter(|(_, block)| block.iter().any(|&w| w != 0.0))
            .map(|(id, block)| (id as u64, block))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_stride_aligned() {
        let mut params = DenseParameters::new(3, 1);
        params.block_mut(6)[0] = 1.0;
        params.block_mut(6)[1] = 2.0;

        // Index 7 lands in the same block as 6.
        assert_eq!(params.block(7), &[1.0, 2.0][..]);
        assert_eq!(params.block(6), params.block(7));
    }

    #[test]
    fn seeded_clone_shares_memory() {
        let mut params = DenseParameters::new(3, 0);
        params.block_mut(5)[0] = 9.0;
        let copy = params.seeded_clone();
        assert!(copy.is_seeded());
        assert_eq!(copy.block(5)[0], 9.0);
        assert_eq!(Arc::strong_count(&params.weights), 2);
    }
}
