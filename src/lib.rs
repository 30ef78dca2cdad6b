//! reducers: online machine learning built on composable reductions.
//!
//! Small learning stages are stacked so each stage transforms an example
//! and delegates the residual problem to the stage beneath it, while every
//! stage shares one physical weight array.
//!
//! # Key Types
//!
//! - [`Parameters`] - the shared dense/sparse weight store
//! - [`Learner`] / [`Reduction`] - the stage chain and stage behavior
//! - [`OffsetTree`] - k-ary decisions over a tree of binary classifiers
//! - [`SgdLearner`] - the scalar bottom stage chains terminate in
//! - [`Workspace`] / [`WorkspaceConfig`] - shared state and configuration
//!
//! # Assembling a stack
//!
//! ```
//! use reducers::offset_tree::{OffsetTree, OffsetTreeConfig};
//! use reducers::sgd::{SgdConfig, SgdLearner};
//! use reducers::workspace::{Workspace, WorkspaceConfig};
//!
//! let sgd = SgdConfig::builder().learning_rate(0.25f32).build().unwrap();
//! let mut ws = Workspace::new(WorkspaceConfig::default(), sgd.stride_shift());
//!
//! let base = SgdLearner::new(sgd).into_learner(&ws);
//! let tree = OffsetTree::new(
//!     OffsetTreeConfig::builder().num_actions(4u32).build().unwrap(),
//! )
//! .unwrap();
//! let mut learner = tree.into_learner(base);
//!
//! let mut ex = reducers::testing::cost_example(&[(7, 1.0)], &[]);
//! learner.predict(&mut ws, &mut ex, 0);
//! assert!((1..=4).contains(&ex.pred.action()));
//! ```

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod logger;
pub mod offset_tree;
pub mod params;
pub mod persist;
pub mod reduction;
pub mod sgd;
pub mod testing;
pub mod workspace;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use logger::{TrainingLogger, Verbosity};
pub use offset_tree::{OffsetTree, OffsetTreeConfig, OffsetTreeError, Topology};
pub use params::Parameters;
pub use persist::{ModelIo, PersistError};
pub use reduction::{
    ActionCost, CostLabel, Example, ExampleShape, Feature, Label, LabelGuard, LabelKind, Learner,
    Prediction, Reduction, SimpleLabel,
};
pub use sgd::{SgdConfig, SgdLearner};
pub use workspace::{Workspace, WorkspaceConfig};
