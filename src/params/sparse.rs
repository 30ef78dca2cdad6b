//! Hash-map-backed weight storage with lazy block creation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Addressing, DefaultInit, ZERO_BLOCK};

/// Sparse parameter store: blocks materialize on first touch.
///
/// A read of a missing block is a get-or-insert-with-default: the block is
/// allocated zeroed and the registered default-initializer (if any) runs
/// exactly once for it. That write side effect is the point of the sparse
/// backing; callers that need a pure read must hold a seeded copy.
pub struct SparseParameters {
    blocks: Arc<HashMap<u64, Box<[f32]>>>,
    addressing: Addressing,
    default_init: Option<DefaultInit>,
    seeded: bool,
}

impl SparseParameters {
    /// Create an empty store covering the same address space as a dense
    /// store of `2^num_bits` blocks.
    pub fn new(num_bits: u32, stride_shift: u32) -> Self {
        Self {
            blocks: Arc::new(HashMap::new()),
            addressing: Addressing::new(num_bits, stride_shift),
            default_init: None,
            seeded: false,
        }
    }

    #[inline]
    pub(crate) fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Whether this store adopted another store's map.
    #[inline]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Register the per-block default-initializer.
    ///
    /// Applies only to blocks created after this call; each block sees the
    /// initializer at most once, on creation.
    pub fn set_default(&mut self, init: DefaultInit) {
        self.default_init = Some(init);
    }

    /// Read the block containing raw index `idx`, vivifying on owned
    /// stores; on seeded stores a miss reads as zeros.
    #[inline]
    pub fn read_block(&mut self, idx: u64) -> &[f32] {
        if self.seeded {
            let id = self.addressing.block_id(idx);
            let stride = self.addressing.stride() as usize;
            return match self.blocks.get(&id) {
                Some(block) => block,
                None => &ZERO_BLOCK[..stride],
            };
        }
        self.vivify(idx)
    }

    /// Mutable access to the block containing raw index `idx`.
    ///
    /// # Panics
    ///
    /// Panics if the store is seeded.
    #[inline]
    pub fn write_block(&mut self, idx: u64) -> &mut [f32] {
        assert!(!self.seeded, "write through a seeded parameter store");
        self.vivify(idx)
    }

    fn vivify(&mut self, idx: u64) -> &mut [f32] {
        let id = self.addressing.block_id(idx);
        let stride = self.addressing.stride() as usize;
        let blocks = Arc::get_mut(&mut self.blocks)
            .expect("parameter store map is shared by a seeded copy");
        match blocks.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut block = vec![0.0f32; stride].into_boxed_slice();
                if let Some(init) = self.default_init.as_mut() {
                    init(&mut block, id);
                }
                entry.insert(block)
            }
        }
    }

    /// Share this store's map into a read-only copy.
    ///
    /// The copy never vivifies, so it carries no initializer.
    pub fn seeded_clone(&self) -> Self {
        Self {
            blocks: Arc::clone(&self.blocks),
            addressing: self.addressing,
            default_init: None,
            seeded: true,
        }
    }

    /// Blocks with any non-zero scalar, sorted by block id.
    pub fn nonzero_blocks(&self) -> Vec<(u64, &[f32])> {
        let mut blocks: Vec<(u64, &[f32])> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.iter().any(|&w| w != 0.0))
            .map(|(&id, block)| (id, &**block))
            .collect();
        blocks.sort_unstable_by_key(|&(id, _)| id);
        blocks
    }

    /// Number of materialized blocks (zero or not).
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block has materialized yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl fmt::Debug for SparseParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseParameters")
            .field("blocks", &self.blocks.len())
            .field("addressing", &self.addressing)
            .field("has_default", &self.default_init.is_some())
            .field("seeded", &self.seeded)
            .finish()
    }
}
