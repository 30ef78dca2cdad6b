//! Testing utilities for reducers.
//!
//! Synthetic examples and stack assembly helpers shared by unit and
//! integration tests.
//!
//! ```ignore
//! use reducers::testing::{cost_example, full_cost_vector, offset_tree_stack};
//! ```

use crate::offset_tree::{OffsetTree, OffsetTreeConfig};
use crate::reduction::{ActionCost, CostLabel, Example, Feature, Label, Learner, SimpleLabel};
use crate::sgd::{SgdConfig, SgdLearner};
use crate::workspace::{Workspace, WorkspaceConfig};

/// Default tolerance for floating point comparisons in tests.
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// Example with a simple scalar label.
pub fn simple_example(features: &[(u64, f32)], target: f32) -> Example {
    Example::new(features_vec(features), Label::Simple(SimpleLabel::new(target)))
}

/// Prediction-only example.
pub fn unlabeled_example(features: &[(u64, f32)]) -> Example {
    Example::unlabeled(features_vec(features))
}

/// Example with explicit `(action, cost, probability)` entries.
pub fn cost_example(features: &[(u64, f32)], costs: &[(u32, f32, f32)]) -> Example {
    Example::new(
        features_vec(features),
        Label::Costs(CostLabel::new(
            costs
                .iter()
                .map(|&(action, cost, probability)| ActionCost {
                    action,
                    cost,
                    probability,
                })
                .collect(),
        )),
    )
}

/// Full-feedback cost vector: action `i+1` observed with `costs[i]` at
/// propensity 1.
pub fn full_cost_vector(costs: &[f32]) -> Vec<(u32, f32, f32)> {
    costs
        .iter()
        .enumerate()
        .map(|(i, &cost)| (i as u32 + 1, cost, 1.0))
        .collect()
}

/// Assemble an offset-tree-over-sgd stack sharing one workspace.
pub fn offset_tree_stack(
    num_actions: u32,
    workspace: WorkspaceConfig,
    sgd: SgdConfig,
) -> (Workspace, Learner) {
    let ws = Workspace::new(workspace, sgd.stride_shift());
    let base = SgdLearner::new(sgd).into_learner(&ws);
    let tree = OffsetTree::new(
        OffsetTreeConfig::builder()
            .num_actions(num_actions)
            .build()
            .expect("static config"),
    )
    .expect("valid action count");
    let learner = tree.into_learner(base);
    (ws, learner)
}

fn features_vec(features: &[(u64, f32)]) -> Vec<Feature> {
    features
        .iter()
        .map(|&(index, value)| Feature::new(index, value))
        .collect()
}
