//! The stage chain: wrapping, offset-partitioned dispatch, lifecycle.
//!
//! A [`Learner`] owns one reduction's behavior plus (exclusively) the stage
//! beneath it, forming a linear chain down to a base stage that touches the
//! parameter store. Every entry point brackets the example's addressing
//! offset by `increment * sub_id`, which is how one physical weight array
//! hosts `weight_multiplier` independent sub-models per stage.
//!
//! Lifecycle hooks (`end_pass`, `end_examples`, `finish`, `save_load`) fold
//! over the chain top-down, each stage firing exactly once.
//! `finish_example` is deliberately not recursive: only the top stage's
//! hook fires.

use crate::persist::{ModelIo, PersistError};
use crate::workspace::Workspace;

use super::{Example, LabelKind};

/// Mutable handle to the stage beneath the one being invoked; `None` for
/// the bottom of the chain.
pub type Base<'a> = Option<&'a mut Learner>;

/// Whether a stage consumes one example or an ordered batch representing a
/// single multi-part decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExampleShape {
    Single,
    Multiline,
}

// ============================================================================
// Reduction trait
// ============================================================================

/// One layer of the reduction stack.
///
/// Implementations override the entry points matching their declared
/// [`shape`](Reduction::shape); the remaining defaults fail fast, because a
/// shape mismatch is a wiring error, never data-dependent.
pub trait Reduction {
    /// Stable stage name; also the persisted record name.
    fn name(&self) -> &'static str;

    /// Label kind this stage consumes in `learn`.
    fn label_kind(&self) -> LabelKind;

    /// Example shape this stage accepts.
    fn shape(&self) -> ExampleShape {
        ExampleShape::Single
    }

    fn predict(&mut self, _base: Base<'_>, _ws: &mut Workspace, _ex: &mut Example) {
        panic!("reduction {} does not accept single examples", self.name());
    }

    fn learn(&mut self, _base: Base<'_>, _ws: &mut Workspace, _ex: &mut Example) {
        panic!("reduction {} does not accept single examples", self.name());
    }

    fn predict_multi(&mut self, _base: Base<'_>, _ws: &mut Workspace, _exs: &mut [Example]) {
        panic!("reduction {} does not accept multiline input", self.name());
    }

    fn learn_multi(&mut self, _base: Base<'_>, _ws: &mut Workspace, _exs: &mut [Example]) {
        panic!("reduction {} does not accept multiline input", self.name());
    }

    /// Apply a precomputed step without recomputing the prediction.
    ///
    /// Wrapping stages forward to their base by default; the bottom stage
    /// must implement it or reject it.
    fn update(&mut self, base: Base<'_>, ws: &mut Workspace, ex: &mut Example) {
        match base {
            Some(base) => base.update(ws, ex, 0),
            None => panic!("reduction {} does not implement update", self.name()),
        }
    }

    /// Sensitivity of the prediction to a unit update; recurses to the base
    /// by default.
    fn sensitivity(&mut self, base: Base<'_>, ws: &mut Workspace, ex: &mut Example) -> f32 {
        match base {
            Some(base) => base.sensitivity(ws, ex),
            None => panic!("reduction {} does not implement sensitivity", self.name()),
        }
    }

    /// Persist or restore this stage's record. The chain has already
    /// verified a stream is present.
    fn save_load(&mut self, _ws: &mut Workspace, _io: &mut ModelIo<'_>) -> Result<(), PersistError> {
        Ok(())
    }

    fn end_pass(&mut self, _ws: &mut Workspace) {}

    fn end_examples(&mut self, _ws: &mut Workspace) {}

    /// Release owned resources. Fired exactly once, by [`Learner::finish`].
    fn finish(&mut self, _ws: &mut Workspace) {}

    /// Per-example epilogue. Fired only on the top stage.
    fn finish_example(&mut self, _ws: &mut Workspace, _ex: &mut Example) {}
}

// ============================================================================
// Offset bracketing
// ============================================================================

/// Shifts an example's offset on construction and restores it on drop, on
/// every exit path.
struct OffsetBracket<'a> {
    ex: &'a mut Example,
    shift: u64,
    #[cfg(debug_assertions)]
    entry_offset: u64,
}

impl<'a> OffsetBracket<'a> {
    fn apply(ex: &'a mut Example, shift: u64) -> Self {
        #[cfg(debug_assertions)]
        let entry_offset = ex.offset;
        ex.offset = ex.offset.wrapping_add(shift);
        Self {
            ex,
            shift,
            #[cfg(debug_assertions)]
            entry_offset,
        }
    }

    fn example(&mut self) -> &mut Example {
        self.ex
    }
}

impl Drop for OffsetBracket<'_> {
    fn drop(&mut self) {
        self.ex.offset = self.ex.offset.wrapping_sub(self.shift);
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            self.ex.offset, self.entry_offset,
            "a stage beneath this bracket leaked an offset shift"
        );
    }
}

/// Slice form of [`OffsetBracket`] for multiline calls.
struct MultiOffsetBracket<'a> {
    exs: &'a mut [Example],
    shift: u64,
}

impl<'a> MultiOffsetBracket<'a> {
    fn apply(exs: &'a mut [Example], shift: u64) -> Self {
        for ex in exs.iter_mut() {
            ex.offset = ex.offset.wrapping_add(shift);
        }
        Self { exs, shift }
    }

    fn examples(&mut self) -> &mut [Example] {
        self.exs
    }
}

impl Drop for MultiOffsetBracket<'_> {
    fn drop(&mut self) {
        for ex in self.exs.iter_mut() {
            ex.offset = ex.offset.wrapping_sub(self.shift);
        }
    }
}

// ============================================================================
// Learner
// ============================================================================

/// A configured stage and everything beneath it.
///
/// Chains are assembled bottom-up once; topology is immutable afterwards.
/// Destroying the top destroys the whole chain exactly once, and
/// [`finish`](Learner::finish) consumes the chain so the finish hooks
/// cannot fire twice.
pub struct Learner {
    reduction: Box<dyn Reduction>,
    base: Option<Box<Learner>>,
    increment: u64,
    label_kind: LabelKind,
    shape: ExampleShape,
    name: &'static str,
}

impl Learner {
    /// Create the bottom of a chain.
    ///
    /// `increment` is the stage's params-per-feature span in weight space
    /// (the store stride for scalar learners).
    pub fn base_stage(reduction: Box<dyn Reduction>, increment: u64) -> Self {
        assert!(increment > 0, "base stage increment must be positive");
        let label_kind = reduction.label_kind();
        let shape = reduction.shape();
        let name = reduction.name();
        Self {
            reduction,
            base: None,
            increment,
            label_kind,
            shape,
            name,
        }
    }

    /// Wrap `base` with a new stage needing `weight_multiplier` private
    /// sub-models.
    pub fn wrap(reduction: Box<dyn Reduction>, base: Learner, weight_multiplier: u64) -> Self {
        assert!(
            weight_multiplier > 0,
            "stage {} needs at least one sub-model",
            reduction.name()
        );
        let increment = base
            .increment
            .checked_mul(weight_multiplier)
            .expect("stage increment overflows weight space");
        let label_kind = reduction.label_kind();
        let shape = reduction.shape();
        let name = reduction.name();
        Self {
            reduction,
            base: Some(Box::new(base)),
            increment,
            label_kind,
            shape,
            name,
        }
    }

    /// This stage's offset increment (`base_increment * weight_multiplier`).
    #[inline]
    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// Stage name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Label kind this stage learns from.
    #[inline]
    pub fn label_kind(&self) -> LabelKind {
        self.label_kind
    }

    /// Example shape this stage accepts.
    #[inline]
    pub fn shape(&self) -> ExampleShape {
        self.shape
    }

    /// Number of stages in the chain, this one included.
    pub fn depth(&self) -> usize {
        1 + self.base.as_deref().map_or(0, Learner::depth)
    }

    #[inline]
    fn assert_shape(&self, called: ExampleShape) {
        assert_eq!(
            self.shape, called,
            "stage {} accepts {:?} examples, called with {:?}",
            self.name, self.shape, called
        );
    }

    #[inline]
    fn assert_label(&self, ex: &Example) {
        assert_eq!(
            ex.label.kind(),
            self.label_kind,
            "stage {} learns from {:?} labels, example carries {:?}",
            self.name,
            self.label_kind,
            ex.label.kind()
        );
    }

    /// Predict into the sub-model selected by `sub_id`.
    pub fn predict(&mut self, ws: &mut Workspace, ex: &mut Example, sub_id: u64) {
        self.assert_shape(ExampleShape::Single);
        let mut bracket = OffsetBracket::apply(ex, self.increment * sub_id);
        self.reduction
            .predict(self.base.as_deref_mut(), ws, bracket.example());
    }

    /// Learn into the sub-model selected by `sub_id`.
    ///
    /// # Panics
    ///
    /// Panics if the example's label kind does not match this stage's.
    pub fn learn(&mut self, ws: &mut Workspace, ex: &mut Example, sub_id: u64) {
        self.assert_shape(ExampleShape::Single);
        self.assert_label(ex);
        let mut bracket = OffsetBracket::apply(ex, self.increment * sub_id);
        self.reduction
            .learn(self.base.as_deref_mut(), ws, bracket.example());
    }

    /// Apply a precomputed step to the sub-model selected by `sub_id`
    /// without recomputing the prediction.
    pub fn update(&mut self, ws: &mut Workspace, ex: &mut Example, sub_id: u64) {
        self.assert_shape(ExampleShape::Single);
        self.assert_label(ex);
        let mut bracket = OffsetBracket::apply(ex, self.increment * sub_id);
        self.reduction
            .update(self.base.as_deref_mut(), ws, bracket.example());
    }

    /// Multiline predict; the offset bracket covers every example in the
    /// batch.
    pub fn predict_multi(&mut self, ws: &mut Workspace, exs: &mut [Example], sub_id: u64) {
        self.assert_shape(ExampleShape::Multiline);
        let mut bracket = MultiOffsetBracket::apply(exs, self.increment * sub_id);
        self.reduction
            .predict_multi(self.base.as_deref_mut(), ws, bracket.examples());
    }

    /// Multiline learn.
    pub fn learn_multi(&mut self, ws: &mut Workspace, exs: &mut [Example], sub_id: u64) {
        self.assert_shape(ExampleShape::Multiline);
        for ex in exs.iter() {
            self.assert_label(ex);
        }
        let mut bracket = MultiOffsetBracket::apply(exs, self.increment * sub_id);
        self.reduction
            .learn_multi(self.base.as_deref_mut(), ws, bracket.examples());
    }

    /// Sensitivity of the stack's prediction to a unit update.
    pub fn sensitivity(&mut self, ws: &mut Workspace, ex: &mut Example) -> f32 {
        self.reduction
            .sensitivity(self.base.as_deref_mut(), ws, ex)
    }

    /// Persist or restore the whole chain, outermost stage first.
    ///
    /// An absent backing stream is a no-op, not an error.
    pub fn save_load(&mut self, ws: &mut Workspace, io: &mut ModelIo<'_>) -> Result<(), PersistError> {
        if io.is_absent() {
            return Ok(());
        }
        self.reduction.save_load(ws, io)?;
        match self.base.as_deref_mut() {
            Some(base) => base.save_load(ws, io),
            None => Ok(()),
        }
    }

    /// Fire every stage's `end_pass` hook exactly once, top-down.
    pub fn end_pass(&mut self, ws: &mut Workspace) {
        self.reduction.end_pass(ws);
        if let Some(base) = self.base.as_deref_mut() {
            base.end_pass(ws);
        }
    }

    /// Fire every stage's `end_examples` hook exactly once, top-down.
    pub fn end_examples(&mut self, ws: &mut Workspace) {
        self.reduction.end_examples(ws);
        if let Some(base) = self.base.as_deref_mut() {
            base.end_examples(ws);
        }
    }

    /// Fire every stage's `finish` hook exactly once, top-down, and release
    /// the chain. Consuming `self` makes a second finish unrepresentable.
    pub fn finish(mut self, ws: &mut Workspace) {
        self.reduction.finish(ws);
        if let Some(base) = self.base.take() {
            (*base).finish(ws);
        }
    }

    /// Per-example epilogue; only this (top) stage's hook fires.
    pub fn finish_example(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.reduction.finish_example(ws, ex);
    }
}

impl std::fmt::Debug for Learner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Learner")
            .field("name", &self.name)
            .field("increment", &self.increment)
            .field("label_kind", &self.label_kind)
            .field("shape", &self.shape)
            .field("depth", &self.depth())
            .finish()
    }
}
