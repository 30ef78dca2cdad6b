//! Reduction composition: stages, labels, examples, and the learner chain.
//!
//! This module provides the machinery every concrete algorithm is built
//! from:
//!
//! - [`Example`] / [`Feature`] / [`Prediction`]: what flows through a stack
//! - [`Label`] / [`LabelKind`] / [`LabelGuard`]: label-kind-safe dispatch
//! - [`Reduction`]: the behavior of one stage
//! - [`Learner`]: the bottom-up-built ownership chain with
//!   offset-partitioned addressing and lifecycle hooks

mod example;
mod label;
mod learner;

pub use example::{Example, Feature, Prediction};
pub use label::{ActionCost, CostLabel, Label, LabelGuard, LabelKind, SimpleLabel};
pub use learner::{Base, ExampleShape, Learner, Reduction};
