//! Schema types for per-stage records.
//!
//! Schema structs are separate from runtime types so the persisted layout
//! can evolve independently and be validated on the way in. Weight blocks
//! are written in block-id order for deterministic output.

use serde::{Deserialize, Serialize};

/// One non-zero weight block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBlockRecord {
    /// Block id (`masked index >> stride_shift`).
    pub id: u64,
    /// The block's scalars; length equals the store stride.
    pub values: Vec<f32>,
}

/// Bottom-stage record: hyper-state plus the store contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdRecord {
    /// Address bits of the store the weights were trained in.
    pub num_bits: u32,
    /// Stride shift of that store.
    pub stride_shift: u32,
    /// Whether adaptive step-size state occupies block slot 1.
    pub adaptive: bool,
    /// Learning rate in effect when the model was written.
    pub learning_rate: f32,
    /// Non-zero weight blocks, sorted by id.
    pub blocks: Vec<WeightBlockRecord>,
}

/// Offset-tree record: topology is rebuilt from the leaf count, so the
/// count is all that travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTreeRecord {
    pub num_actions: u32,
}
