//! Scalar SGD: the bottom stage every chain in this crate terminates in.
//!
//! An importance-weighted squared-loss learner over the parameter store.
//! Each feature owns one weight block at `strided_index(feature) + offset`;
//! block slot 0 is the weight, and in adaptive mode slot 1 accumulates
//! squared gradients for AdaGrad-style step scaling.
//!
//! The example's `offset` has already been positioned by the stages above,
//! so the same code serves every sub-model of every wrapping stage.

use derive_builder::Builder;

use crate::persist::{ModelIo, PersistError, SgdRecord, WeightBlockRecord};
use crate::reduction::{Base, Example, Label, LabelKind, Learner, Prediction, Reduction};
use crate::workspace::Workspace;

/// Guard against division by a vanishing adaptive accumulator.
const ADAPTIVE_EPS: f32 = 1e-8;

/// SGD configuration.
///
/// ```
/// use reducers::sgd::SgdConfig;
///
/// let config = SgdConfig::builder()
///     .learning_rate(0.1f32)
///     .adaptive(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.stride_shift(), 1);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct SgdConfig {
    /// Step size.
    #[builder(default = "0.5")]
    pub learning_rate: f32,

    /// Keep per-feature squared-gradient state and scale steps by
    /// `1 / sqrt(sum_sq_grad)`.
    #[builder(default = "false")]
    pub adaptive: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            adaptive: false,
        }
    }
}

impl SgdConfig {
    /// Fluent configuration builder.
    pub fn builder() -> SgdConfigBuilder {
        SgdConfigBuilder::default()
    }

    /// Stride shift the workspace store must be created with: adaptive
    /// blocks carry `[weight, sum_sq_grad]`, plain blocks just `[weight]`.
    #[inline]
    pub fn stride_shift(&self) -> u32 {
        if self.adaptive {
            1
        } else {
            0
        }
    }
}

/// The bottom-stage learner.
#[derive(Debug)]
pub struct SgdLearner {
    config: SgdConfig,
    /// Progressive (pre-update) squared loss this pass.
    sum_loss: f64,
    /// Importance mass seen this pass.
    weighted_examples: f64,
}

impl SgdLearner {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            sum_loss: 0.0,
            weighted_examples: 0.0,
        }
    }

    /// Wrap into a base-of-chain [`Learner`]. The increment is the store
    /// stride: one block per feature per sub-model.
    pub fn into_learner(self, ws: &Workspace) -> Learner {
        assert_eq!(
            ws.params.stride_shift(),
            self.config.stride_shift(),
            "workspace store stride does not match the sgd configuration"
        );
        let increment = ws.params.stride();
        Learner::base_stage(Box::new(self), increment)
    }

    fn margin(&self, ws: &mut Workspace, ex: &Example) -> f32 {
        let mut sum = 0.0f32;
        for feature in &ex.features {
            let idx = ws
                .params
                .strided_index(feature.index)
                .wrapping_add(ex.offset);
            sum += feature.value * ws.params.read_block(idx)[0];
        }
        sum
    }

    /// One gradient step against `error = target - prediction`.
    fn apply_step(&mut self, ws: &mut Workspace, ex: &Example, error: f32, importance: f32) {
        if error == 0.0 || importance <= 0.0 {
            return;
        }
        let learning_rate = self.config.learning_rate;
        for feature in &ex.features {
            if feature.value == 0.0 {
                continue;
            }
            let idx = ws
                .params
                .strided_index(feature.index)
                .wrapping_add(ex.offset);
            let block = ws.params.write_block(idx);
            let gradient = error * feature.value;
            let step = if self.config.adaptive {
                block[1] += gradient * gradient;
                learning_rate * importance * gradient / (block[1].sqrt() + ADAPTIVE_EPS)
            } else {
                learning_rate * importance * gradient
            };
            block[0] += step;
        }
    }

    fn simple_label(ex: &Example) -> (f32, f32) {
        match &ex.label {
            Label::Simple(label) => (label.target, label.weight),
            // The chain verified the kind before dispatch.
            other => unreachable!("sgd invoked with {:?} label", other.kind()),
        }
    }
}

impl Reduction for SgdLearner {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn label_kind(&self) -> LabelKind {
        LabelKind::Simple
    }

    fn predict(&mut self, _base: Base<'_>, ws: &mut Workspace, ex: &mut Example) {
        let margin = self.margin(ws, ex);
        ex.partial_prediction = margin;
        ex.pred = Prediction::Scalar(margin);
    }

    fn learn(&mut self, base: Base<'_>, ws: &mut Workspace, ex: &mut Example) {
        self.predict(base, ws, ex);
        let (target, importance) = Self::simple_label(ex);
        let error = target - ex.partial_prediction;

        self.sum_loss += f64::from(importance) * f64::from(error * error);
        self.weighted_examples += f64::from(importance);

        self.apply_step(ws, ex, error, importance);
    }

    fn update(&mut self, _base: Base<'_>, ws: &mut Workspace, ex: &mut Example) {
        let (target, importance) = Self::simple_label(ex);
        let error = target - ex.partial_prediction;
        self.apply_step(ws, ex, error, importance);
    }

    fn sensitivity(&mut self, _base: Base<'_>, _ws: &mut Workspace, ex: &mut Example) -> f32 {
        // First-order slope of the margin under one step: eta * ||x||^2.
        let norm_sq: f32 = ex.features.iter().map(|f| f.value * f.value).sum();
        self.config.learning_rate * norm_sq
    }

    fn save_load(&mut self, ws: &mut Workspace, io: &mut ModelIo<'_>) -> Result<(), PersistError> {
        if io.is_reading() {
            let record: SgdRecord = io.read_record(self.name())?;
            if record.num_bits != ws.params.num_bits()
                || record.stride_shift != ws.params.stride_shift()
            {
                return Err(PersistError::Corrupt(format!(
                    "model trained in a 2^{} x {}-stride store, workspace has 2^{} x {}",
                    record.num_bits,
                    1u64 << record.stride_shift,
                    ws.params.num_bits(),
                    ws.params.stride()
                )));
            }
            if record.adaptive != self.config.adaptive {
                return Err(PersistError::Corrupt(
                    "model and configuration disagree on adaptive state".to_owned(),
                ));
            }
            self.config.learning_rate = record.learning_rate;
            for block in &record.blocks {
                ws.params.load_block(block.id, &block.values);
            }
        } else {
            let record = SgdRecord {
                num_bits: ws.params.num_bits(),
                stride_shift: ws.params.stride_shift(),
                adaptive: self.config.adaptive,
                learning_rate: self.config.learning_rate,
                blocks: ws
                    .params
                    .nonzero_blocks()
                    .into_iter()
                    .map(|(id, values)| WeightBlockRecord {
                        id,
                        values: values.to_vec(),
                    })
                    .collect(),
            };
            io.write_record(self.name(), &record)?;
        }
        Ok(())
    }

    fn end_pass(&mut self, ws: &mut Workspace) {
        if self.weighted_examples > 0.0 {
            ws.logger.pass_summary(
                ws.pass_count,
                self.weighted_examples,
                self.sum_loss / self.weighted_examples,
            );
        }
        self.sum_loss = 0.0;
        self.weighted_examples = 0.0;
    }

    fn finish(&mut self, ws: &mut Workspace) {
        ws.logger
            .debug(format_args!("sgd finished after {} examples", ws.example_count));
    }
}
