//! The workspace: shared mutable state for one reduction stack.
//!
//! A workspace owns the single parameter store every stage addresses, the
//! seeded RNG, the logger, and the pass/example counters. It is created
//! once, before the stack is assembled, and handed into every framework
//! call; stages never own weights themselves.

use derive_builder::Builder;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::logger::{TrainingLogger, Verbosity};
use crate::params::Parameters;

/// Workspace configuration.
///
/// ```
/// use reducers::workspace::WorkspaceConfig;
///
/// let config = WorkspaceConfig::builder()
///     .num_bits(20u32)
///     .sparse(true)
///     .seed(7u64)
///     .build()
///     .unwrap();
/// assert_eq!(config.num_bits, 20);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct WorkspaceConfig {
    /// Address bits: the store holds `2^num_bits` weight blocks.
    #[builder(default = "18")]
    pub num_bits: u32,

    /// Use the hash-map-backed store with lazy block creation.
    #[builder(default = "false")]
    pub sparse: bool,

    /// Seed for the workspace RNG.
    #[builder(default = "0")]
    pub seed: u64,

    /// Progress-output verbosity.
    #[builder(default)]
    pub verbosity: Verbosity,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            num_bits: 18,
            sparse: false,
            seed: 0,
            verbosity: Verbosity::default(),
        }
    }
}

impl WorkspaceConfig {
    /// Fluent configuration builder.
    pub fn builder() -> WorkspaceConfigBuilder {
        WorkspaceConfigBuilder::default()
    }
}

/// Shared state for one stack.
#[derive(Debug)]
pub struct Workspace {
    /// The single shared weight store.
    pub params: Parameters,
    /// Deterministic RNG; the offset tree's promotion filter draws from it.
    pub rng: Xoshiro256PlusPlus,
    /// Progress logger used by `end_pass` hooks.
    pub logger: TrainingLogger,
    /// Completed passes over the input.
    pub pass_count: u64,
    /// Examples processed so far.
    pub example_count: u64,
}

impl Workspace {
    /// Create a workspace whose store uses `stride_shift` scalars-per-block
    /// shift (the bottom stage dictates it; see `SgdConfig::stride_shift`).
    pub fn new(config: WorkspaceConfig, stride_shift: u32) -> Self {
        let params = if config.sparse {
            Parameters::new_sparse(config.num_bits, stride_shift)
        } else {
            Parameters::new_dense(config.num_bits, stride_shift)
        };
        Self {
            params,
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed),
            logger: TrainingLogger::new(config.verbosity),
            pass_count: 0,
            example_count: 0,
        }
    }

    /// Record one processed example.
    #[inline]
    pub fn count_example(&mut self) {
        self.example_count += 1;
    }

    /// Record a completed pass. Callers fire the stack's `end_pass` fold
    /// after this.
    #[inline]
    pub fn count_pass(&mut self) {
        self.pass_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default() {
        let built = WorkspaceConfig::builder().build().unwrap();
        let defaulted = WorkspaceConfig::default();
        assert_eq!(built.num_bits, defaulted.num_bits);
        assert_eq!(built.sparse, defaulted.sparse);
        assert_eq!(built.seed, defaulted.seed);
    }

    #[test]
    fn workspace_builds_requested_backing() {
        let dense = Workspace::new(WorkspaceConfig::default(), 1);
        assert!(matches!(dense.params, Parameters::Dense(_)));
        assert_eq!(dense.params.stride(), 2);

        let config = WorkspaceConfig::builder().sparse(true).build().unwrap();
        let sparse = Workspace::new(config, 0);
        assert!(matches!(sparse.params, Parameters::Sparse(_)));
    }

    #[test]
    fn same_seed_same_draws() {
        use rand::Rng;

        let mut a = Workspace::new(WorkspaceConfig::builder().seed(9u64).build().unwrap(), 0);
        let mut b = Workspace::new(WorkspaceConfig::builder().seed(9u64).build().unwrap(), 0);
        let draws_a: Vec<f32> = (0..4).map(|_| a.rng.gen()).collect();
        let draws_b: Vec<f32> = (0..4).map(|_| b.rng.gen()).collect();
        assert_eq!(draws_a, draws_b);
    }
}
