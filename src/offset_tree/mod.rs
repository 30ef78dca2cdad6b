//! The offset tree: a k-ary decision reduced to a minimum-depth binary
//! tree of classifiers.
//!
//! Every internal node owns a private binary classifier in the shared
//! parameter store, addressed through the framework with `sub_id =
//! node_id`. Prediction descends from the root routing on the classifier's
//! signed margin; learning walks observed inverse-propensity-weighted
//! costs bottom-up, training each parent toward its cheaper child and
//! propagating a margin-blended cost estimate.
//!
//! # Learning rule
//!
//! For each labelled `(action, cost, probability)` entry, the action's leaf
//! enters a frontier with cost `cost / probability`. Level by level, two
//! siblings in the frontier train their parent: target prefers the
//! lower-cost child, update weight is the absolute cost difference, and
//! near-zero weights pass through a randomized promotion filter (below).
//! The parent then re-predicts and joins the frontier with cost
//! `(1-p) * cost_left + p * cost_right`, where `p = (1 + clamp(margin,
//! -1, 1)) / 2`. A frontier member whose sibling is absent hoists its cost
//! to the parent untrained. The walk ends at the root.
//!
//! The promotion filter is a variance-reduction rule preserved exactly:
//! a weight below [`PROMOTION_THRESHOLD`] trains at the threshold with
//! probability `weight / PROMOTION_THRESHOLD` and is skipped otherwise, so
//! the expected applied weight equals the true weight and an exactly-zero
//! difference never trains.

mod topology;

pub use topology::{Node, Topology};

use derive_builder::Builder;
use rand::Rng;
use thiserror::Error;

use crate::persist::{ModelIo, OffsetTreeRecord, PersistError};
use crate::reduction::{
    Base, Example, Label, LabelKind, Learner, Prediction, Reduction, SimpleLabel,
};
use crate::reduction::LabelGuard;
use crate::workspace::Workspace;

/// Update weights below this threshold go through the randomized
/// promotion filter instead of training directly.
pub const PROMOTION_THRESHOLD: f32 = 1e-6;

/// Floor applied to propensities before the inverse-propensity division.
const MIN_PROPENSITY: f32 = 1e-6;

/// Offset-tree configuration errors.
#[derive(Debug, Error)]
pub enum OffsetTreeError {
    #[error("offset tree requires at least one action, got {0}")]
    TooFewActions(u32),
}

/// Offset-tree configuration.
///
/// ```
/// use reducers::offset_tree::OffsetTreeConfig;
///
/// let config = OffsetTreeConfig::builder()
///     .num_actions(5u32)
///     .build()
///     .unwrap();
/// assert_eq!(config.num_actions, 5);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct OffsetTreeConfig {
    /// Number of actions (tree leaves).
    #[builder(default = "2")]
    pub num_actions: u32,
}

impl Default for OffsetTreeConfig {
    fn default() -> Self {
        Self { num_actions: 2 }
    }
}

impl OffsetTreeConfig {
    /// Fluent configuration builder.
    pub fn builder() -> OffsetTreeConfigBuilder {
        OffsetTreeConfigBuilder::default()
    }
}

/// The offset-tree reduction stage.
#[derive(Debug)]
pub struct OffsetTree {
    topo: Topology,
    num_actions: u32,
    /// Frontier scratch, kept across learn calls to reuse capacity.
    frontier: Vec<(u32, f32)>,
    staged: Vec<(u32, f32)>,
}

impl OffsetTree {
    pub fn new(config: OffsetTreeConfig) -> Result<Self, OffsetTreeError> {
        if config.num_actions == 0 {
            return Err(OffsetTreeError::TooFewActions(0));
        }
        Ok(Self {
            topo: Topology::build(config.num_actions),
            num_actions: config.num_actions,
            frontier: Vec::new(),
            staged: Vec::new(),
        })
    }

    /// Number of private binary classifiers: the internal node count.
    /// Sizes the `weight_multiplier` passed into the wrap.
    #[inline]
    pub fn learner_count(&self) -> u64 {
        u64::from(self.topo.internal_count())
    }

    /// The tree shape.
    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    /// Wrap this stage around `base`.
    pub fn into_learner(self, base: Learner) -> Learner {
        let multiplier = self.learner_count().max(1);
        Learner::wrap(Box::new(self), base, multiplier)
    }

    /// Descend from the root to a leaf, routing on base margins.
    fn descend(&self, base: &mut Learner, ws: &mut Workspace, ex: &mut Example) -> u32 {
        let mut id = Topology::ROOT;
        loop {
            let node = *self.topo.node(id);
            if node.is_leaf {
                return id;
            }
            base.predict(ws, ex, u64::from(id));
            id = if ex.pred.scalar() < 0.0 {
                node.left
            } else {
                node.right
            };
        }
    }

    /// Train one parent whose two children carry costs; returns the cost
    /// propagated to the parent.
    fn train_parent(
        &self,
        base: &mut Learner,
        ws: &mut Workspace,
        ex: &mut Example,
        parent: u32,
        cost_left: f32,
        cost_right: f32,
    ) -> f32 {
        let raw_weight = (cost_left - cost_right).abs();
        let weight = if raw_weight < PROMOTION_THRESHOLD {
            let draw: f32 = ws.rng.gen();
            if draw < raw_weight / PROMOTION_THRESHOLD {
                PROMOTION_THRESHOLD
            } else {
                0.0
            }
        } else {
            raw_weight
        };

        if weight > 0.0 {
            // Negative margins route left, so the cheaper-left case trains
            // toward -1.
            let target = if cost_left < cost_right { -1.0 } else { 1.0 };
            let mut guard =
                LabelGuard::swap_in(ex, Label::Simple(SimpleLabel::weighted(target, weight)));
            base.learn(ws, guard.example(), u64::from(parent));
        }

        base.predict(ws, ex, u64::from(parent));
        let margin = ex.pred.scalar().clamp(-1.0, 1.0);
        let p_right = 0.5 * (1.0 + margin);
        (1.0 - p_right) * cost_left + p_right * cost_right
    }
}

impl Reduction for OffsetTree {
    fn name(&self) -> &'static str {
        "offset_tree"
    }

    fn label_kind(&self) -> LabelKind {
        LabelKind::Costs
    }

    fn predict(&mut self, base: Base<'_>, ws: &mut Workspace, ex: &mut Example) {
        let base = base.expect("offset tree requires a base stage");
        let leaf = self.descend(base, ws, ex);
        ex.pred = Prediction::Action(self.topo.action_for_leaf(leaf));
    }

    fn learn(&mut self, base: Base<'_>, ws: &mut Workspace, ex: &mut Example) {
        let base = base.expect("offset tree requires a base stage");
        let saved_pred = ex.pred;

        // Seed the frontier with inverse-propensity-weighted leaf costs.
        let mut frontier = std::mem::take(&mut self.frontier);
        let mut staged = std::mem::take(&mut self.staged);
        frontier.clear();
        if let Label::Costs(label) = &ex.label {
            for entry in &label.costs {
                assert!(
                    entry.action >= 1 && entry.action <= self.num_actions,
                    "cost entry names action {} outside 1..={}",
                    entry.action,
                    self.num_actions
                );
                let propensity = entry.probability.clamp(MIN_PROPENSITY, 1.0);
                frontier.push((self.topo.leaf_for_action(entry.action), entry.cost / propensity));
            }
        }
        // Merge duplicate entries for the same action.
        frontier.sort_unstable_by_key(|&(id, _)| id);
        frontier.dedup_by(|next, kept| {
            if next.0 == kept.0 {
                kept.1 += next.1;
                true
            } else {
                false
            }
        });

        // Walk the frontier to the root, one depth level at a time.
        while !frontier.is_empty() && !(frontier.len() == 1 && frontier[0].0 == Topology::ROOT) {
            let level = frontier
                .iter()
                .map(|&(id, _)| self.topo.node(id).depth)
                .max()
                .expect("frontier is non-empty");

            staged.clear();
            let mut deepest: Vec<(u32, f32)> = Vec::new();
            for &(id, cost) in &frontier {
                if self.topo.node(id).depth == level {
                    deepest.push((id, cost));
                } else {
                    staged.push((id, cost));
                }
            }

            // Sibling ids are adjacent after the sort, left child first.
            let mut i = 0;
            while i < deepest.len() {
                let (id, cost) = deepest[i];
                let parent = self.topo.node(id).parent;
                if i + 1 < deepest.len() && deepest[i + 1].0 == self.topo.sibling(id) {
                    let (_, sibling_cost) = deepest[i + 1];
                    let propagated =
                        self.train_parent(base, ws, ex, parent, cost, sibling_cost);
                    staged.push((parent, propagated));
                    i += 2;
                } else {
                    // Sibling unobserved: hoist the cost untrained.
                    staged.push((parent, cost));
                    i += 1;
                }
            }

            staged.sort_unstable_by_key(|&(id, _)| id);
            std::mem::swap(&mut frontier, &mut staged);
        }

        ex.pred = saved_pred;
        self.frontier = frontier;
        self.staged = staged;
    }

    fn save_load(&mut self, _ws: &mut Workspace, io: &mut ModelIo<'_>) -> Result<(), PersistError> {
        if io.is_reading() {
            let record: OffsetTreeRecord = io.read_record(self.name())?;
            if record.num_actions != self.num_actions {
                return Err(PersistError::Corrupt(format!(
                    "model trained with {} actions, stage configured for {}",
                    record.num_actions, self.num_actions
                )));
            }
        } else {
            io.write_record(
                self.name(),
                &OffsetTreeRecord {
                    num_actions: self.num_actions,
                },
            )?;
        }
        Ok(())
    }

    fn finish(&mut self, _ws: &mut Workspace) {
        self.frontier = Vec::new();
        self.staged = Vec::new();
    }

    fn finish_example(&mut self, _ws: &mut Workspace, ex: &mut Example) {
        ex.reset_scratch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::{ActionCost, CostLabel, Feature};
    use crate::sgd::{SgdConfig, SgdLearner};
    use crate::workspace::WorkspaceConfig;

    fn stack(num_actions: u32, seed: u64) -> (Workspace, Learner) {
        let sgd = SgdConfig::builder().learning_rate(0.25f32).build().unwrap();
        let ws = Workspace::new(
            WorkspaceConfig::builder()
                .num_bits(12u32)
                .seed(seed)
                .build()
                .unwrap(),
            sgd.stride_shift(),
        );
        let tree = OffsetTree::new(
            OffsetTreeConfig::builder().num_actions(num_actions).build().unwrap(),
        )
        .unwrap();
        let base = SgdLearner::new(sgd).into_learner(&ws);
        (ws, tree.into_learner(base))
    }

    fn cost_example(features: &[(u64, f32)], costs: &[(u32, f32, f32)]) -> Example {
        Example::new(
            features.iter().map(|&(i, v)| Feature::new(i, v)).collect(),
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

    /// Full-feedback cost vector: every action observed with propensity 1.
    fn full_costs(costs: &[f32]) -> Vec<(u32, f32, f32)> {
        costs
            .iter()
            .enumerate()
            .map(|(i, &c)| (i as u32 + 1, c, 1.0))
            .collect()
    }

    #[test]
    fn zero_actions_is_an_error() {
        let err = OffsetTree::new(OffsetTreeConfig { num_actions: 0 }).unwrap_err();
        assert!(matches!(err, OffsetTreeError::TooFewActions(0)));
    }

    #[test]
    fn learner_count_sizes_the_wrap() {
        let tree = OffsetTree::new(OffsetTreeConfig { num_actions: 5 }).unwrap();
        assert_eq!(tree.learner_count(), 4);

        let (_, learner) = stack(5, 0);
        // sgd increment is the stride (1); the tree multiplies by k-1.
        assert_eq!(learner.increment(), 4);
    }

    #[test]
    fn fresh_tree_predicts_deterministically() {
        let (mut ws, mut learner) = stack(8, 0);
        let mut ex = cost_example(&[(3, 1.0)], &[]);

        learner.predict(&mut ws, &mut ex, 0);
        let first = ex.pred.action();
        assert!((1..=8).contains(&first));
        for _ in 0..5 {
            learner.predict(&mut ws, &mut ex, 0);
            assert_eq!(ex.pred.action(), first);
        }
        // Zero weights: every margin is 0.0, which routes right at every
        // internal node, landing in the last leaf.
        assert_eq!(first, 8);
    }

    #[test]
    fn learns_to_pick_the_cheap_action() {
        let (mut ws, mut learner) = stack(4, 1);

        // Action 2 is always cheapest for this context.
        let costs = full_costs(&[1.0, 0.0, 1.0, 1.0]);
        for _ in 0..60 {
            let mut ex = cost_example(&[(5, 1.0)], &costs);
            learner.learn(&mut ws, &mut ex, 0);
            ws.count_example();
        }

        let mut ex = cost_example(&[(5, 1.0)], &[]);
        learner.predict(&mut ws, &mut ex, 0);
        assert_eq!(ex.pred.action(), 2);
    }

    #[test]
    fn contexts_route_to_different_actions() {
        let (mut ws, mut learner) = stack(4, 3);

        let cheap_one = full_costs(&[0.0, 1.0, 1.0, 1.0]);
        let cheap_four = full_costs(&[1.0, 1.0, 1.0, 0.0]);
        for _ in 0..80 {
            let mut a = cost_example(&[(10, 1.0)], &cheap_one);
            learner.learn(&mut ws, &mut a, 0);
            let mut b = cost_example(&[(11, 1.0)], &cheap_four);
            learner.learn(&mut ws, &mut b, 0);
        }

        let mut a = cost_example(&[(10, 1.0)], &[]);
        learner.predict(&mut ws, &mut a, 0);
        assert_eq!(a.pred.action(), 1);

        let mut b = cost_example(&[(11, 1.0)], &[]);
        learner.predict(&mut ws, &mut b, 0);
        assert_eq!(b.pred.action(), 4);
    }

    #[test]
    fn equal_costs_leave_weights_untouched() {
        let (mut ws, mut learner) = stack(4, 0);

        let costs = full_costs(&[0.5, 0.5, 0.5, 0.5]);
        for _ in 0..10 {
            let mut ex = cost_example(&[(1, 1.0), (2, 1.0)], &costs);
            learner.learn(&mut ws, &mut ex, 0);
        }
        // Every sibling pair has an exactly-zero cost difference, so the
        // promotion filter never fires and no classifier trains.
        assert!(ws.params.nonzero_blocks().is_empty());
    }

    #[test]
    fn inverse_propensity_weighting_scales_costs() {
        // A single observed action with propensity 0.5 doubles its cost in
        // the frontier; verify against an explicitly doubled full vector.
        let (mut ws_a, mut learner_a) = stack(2, 7);
        let (mut ws_b, mut learner_b) = stack(2, 7);

        for _ in 0..20 {
            let mut a = cost_example(&[(4, 1.0)], &[(1, 1.0, 0.5), (2, 0.0, 1.0)]);
            learner_a.learn(&mut ws_a, &mut a, 0);
            let mut b = cost_example(&[(4, 1.0)], &[(1, 2.0, 1.0), (2, 0.0, 1.0)]);
            learner_b.learn(&mut ws_b, &mut b, 0);
        }

        let idx = ws_a.params.strided_index(4);
        assert_eq!(
            ws_a.params.read_block(idx)[0],
            ws_b.params.read_block(idx)[0]
        );
    }

    #[test]
    fn label_is_restored_after_learn() {
        let (mut ws, mut learner) = stack(3, 0);
        let costs = full_costs(&[0.0, 1.0, 1.0]);
        let mut ex = cost_example(&[(2, 1.0)], &costs);
        let before = ex.label.clone();
        learner.learn(&mut ws, &mut ex, 0);
        assert_eq!(ex.label, before);
        assert_eq!(ex.offset, 0);
    }

    #[test]
    #[should_panic(expected = "outside 1..=")]
    fn out_of_range_action_fails_fast() {
        let (mut ws, mut learner) = stack(3, 0);
        let mut ex = cost_example(&[(2, 1.0)], &[(9, 1.0, 1.0)]);
        learner.learn(&mut ws, &mut ex, 0);
    }
}
