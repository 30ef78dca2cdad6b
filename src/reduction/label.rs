//! Label kinds and the scoped label swap.
//!
//! A label is a closed sum over the kinds the core understands; every stage
//! declares the kind it consumes and [`Learner::learn`] enforces the match
//! before dispatch. A stage that feeds its base a different kind (the offset
//! tree trains binary classifiers from a cost label) swaps the typed value
//! in through [`LabelGuard`], which restores the original on every exit
//! path.
//!
//! [`Learner::learn`]: crate::reduction::Learner::learn

use std::mem;

use super::Example;

/// Tag identifying which [`Label`] variant a stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// No label (prediction-only examples).
    None,
    /// Scalar target with importance weight.
    Simple,
    /// Per-action observed costs with propensities.
    Costs,
}

/// Scalar regression/classification target.
///
/// Binary stages interpret the sign of `target`; `weight` is the example's
/// importance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleLabel {
    pub target: f32,
    pub weight: f32,
}

impl SimpleLabel {
    /// Unit-importance label.
    pub fn new(target: f32) -> Self {
        Self::weighted(target, 1.0)
    }

    /// Importance-weighted label.
    pub fn weighted(target: f32, weight: f32) -> Self {
        Self { target, weight }
    }
}

/// One observed action with its cost and the probability it was chosen
/// with. `1 / probability` is the inverse-propensity correction applied by
/// consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionCost {
    /// 1-based action id.
    pub action: u32,
    pub cost: f32,
    pub probability: f32,
}

/// Cost label: the observed `(action, cost, probability)` entries for one
/// decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CostLabel {
    pub costs: Vec<ActionCost>,
}

impl CostLabel {
    pub fn new(costs: Vec<ActionCost>) -> Self {
        Self { costs }
    }
}

/// The example's label slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Label {
    #[default]
    None,
    Simple(SimpleLabel),
    Costs(CostLabel),
}

impl Label {
    /// The kind tag for this label.
    #[inline]
    pub fn kind(&self) -> LabelKind {
        match self {
            Label::None => LabelKind::None,
            Label::Simple(_) => LabelKind::Simple,
            Label::Costs(_) => LabelKind::Costs,
        }
    }
}

/// Scoped label swap: replaces an example's label and restores the original
/// when dropped, on every exit path.
///
/// This is a borrow, not a retype: the example leaves the guard with the
/// label it entered with.
#[derive(Debug)]
pub struct LabelGuard<'a> {
    example: &'a mut Example,
    saved: Label,
}

impl<'a> LabelGuard<'a> {
    /// Swap `label` into `example`, saving the current label.
    pub fn swap_in(example: &'a mut Example, label: Label) -> Self {
        let saved = mem::replace(&mut example.label, label);
        Self { example, saved }
    }

    /// The example with the swapped label in place.
    pub fn example(&mut self) -> &mut Example {
        self.example
    }
}

impl Drop for LabelGuard<'_> {
    fn drop(&mut self) {
        self.example.label = mem::take(&mut self.saved);
    }
}
