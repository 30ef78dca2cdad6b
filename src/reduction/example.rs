//! Examples: sparse features, a label slot, and addressing state.

use super::Label;

/// One feature: a hashed index into the parameter store and its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub index: u64,
    pub value: f32,
}

impl Feature {
    pub fn new(index: u64, value: f32) -> Self {
        Self { index, value }
    }
}

/// Prediction produced by a stage, left in the example's scratch slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Prediction {
    #[default]
    None,
    /// Signed margin from a scalar stage.
    Scalar(f32),
    /// 1-based action from a structured stage.
    Action(u32),
}

impl Prediction {
    /// The scalar margin.
    ///
    /// # Panics
    ///
    /// Panics if the last stage did not produce a scalar; that is a wiring
    /// error, not a recoverable state.
    #[inline]
    pub fn scalar(&self) -> f32 {
        match self {
            Prediction::Scalar(s) => *s,
            other => panic!("expected a scalar prediction, got {other:?}"),
        }
    }

    /// The chosen action.
    ///
    /// # Panics
    ///
    /// Panics if the last stage did not produce an action.
    #[inline]
    pub fn action(&self) -> u32 {
        match self {
            Prediction::Action(a) => *a,
            other => panic!("expected an action prediction, got {other:?}"),
        }
    }
}

/// One example flowing through the reduction stack.
///
/// `offset` is the additive shift stages bracket around calls into their
/// base so each sub-model addresses a disjoint region of the store; it
/// belongs to the framework and is always restored after a call returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: Vec<Feature>,
    pub label: Label,
    /// Current addressing offset in weight space.
    pub offset: u64,
    /// Last prediction left by a stage.
    pub pred: Prediction,
    /// Raw margin from the most recent bottom-stage predict, consumed by
    /// `update`.
    pub partial_prediction: f32,
}

impl Example {
    pub fn new(features: Vec<Feature>, label: Label) -> Self {
        Self {
            features,
            label,
            offset: 0,
            pred: Prediction::None,
            partial_prediction: 0.0,
        }
    }

    /// Prediction-only example.
    pub fn unlabeled(features: Vec<Feature>) -> Self {
        Self::new(features, Label::None)
    }

    /// Reset per-call scratch (prediction slots), keeping features, label
    /// and offset.
    pub fn reset_scratch(&mut self) {
        self.pred = Prediction::None;
        self.partial_prediction = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_example_has_clean_scratch() {
        let ex = Example::new(vec![Feature::new(7, 0.5)], Label::None);
        assert_eq!(ex.offset, 0);
        assert_eq!(ex.pred, Prediction::None);
        assert_eq!(ex.partial_prediction, 0.0);
    }

    #[test]
    #[should_panic(expected = "expected a scalar prediction")]
    fn scalar_accessor_rejects_action() {
        Prediction::Action(3).scalar();
    }

    #[test]
    #[should_panic(expected = "expected an action prediction")]
    fn action_accessor_rejects_none() {
        Prediction::None.action();
    }
}
