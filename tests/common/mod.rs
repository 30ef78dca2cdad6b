//! Shared helpers for integration tests.
//!
//! Synthetic example builders live in `reducers::testing`; this module adds
//! the stack configurations the suites share.

#![allow(dead_code)]

use reducers::sgd::SgdConfig;
use reducers::workspace::WorkspaceConfig;
use reducers::{Learner, Workspace};

// Re-export testing utilities for convenience
#[allow(unused_imports)]
pub use reducers::testing::{
    cost_example, full_cost_vector, offset_tree_stack, simple_example, unlabeled_example,
    DEFAULT_TOLERANCE,
};

/// Offset-tree stack over a small dense store with a fixed seed.
pub fn dense_stack(num_actions: u32, seed: u64) -> (Workspace, Learner) {
    offset_tree_stack(
        num_actions,
        WorkspaceConfig::builder()
            .num_bits(14u32)
            .seed(seed)
            .build()
            .unwrap(),
        SgdConfig::builder().learning_rate(0.25f32).build().unwrap(),
    )
}

/// Same stack shape over the sparse backing.
pub fn sparse_stack(num_actions: u32, seed: u64) -> (Workspace, Learner) {
    offset_tree_stack(
        num_actions,
        WorkspaceConfig::builder()
            .num_bits(22u32)
            .sparse(true)
            .seed(seed)
            .build()
            .unwrap(),
        SgdConfig::builder().learning_rate(0.25f32).build().unwrap(),
    )
}
