//! BlockArchitecture - the root of a candidate network, and the evaluation
//! boundary.
//!
//! A block architecture is a block with no parent. On top of the tree
//! behavior it owns search-space-wide parameters (the class count) and the
//! evaluation contract: flatten the tree into a [`ModelGraph`], hand it to
//! an external [`TrainingBackend`], and fold the outcome into an
//! [`EvaluationResult`].
//!
//! Training failures are an explicit partial-failure policy: one bad
//! candidate must not abort a search run, so a backend error is logged and
//! scored as the worst case instead of propagated.

use crate::block::{mutate_tree, Block, MutationEvent};
use crate::model::ModelGraph;
use crate::Result;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Opaque training hyper-parameters, passed through to the backend
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub steps_per_epoch: usize,
    pub optimizer: String,
    pub loss: String,
    pub metrics: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 1,
            batch_size: 32,
            steps_per_epoch: 100,
            optimizer: "adam".to_string(),
            loss: "sparse_categorical_crossentropy".to_string(),
            metrics: vec!["accuracy".to_string()],
        }
    }
}

/// Train/test splits handed through to the backend. The core never reads
/// the contents; flat buffers keep the boundary backend-agnostic.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub train_data: Vec<f32>,
    pub train_labels: Vec<u32>,
    pub test_data: Vec<f32>,
    pub test_labels: Vec<u32>,
}

/// External collaborator that builds, fits and scores a model.
///
/// Implementations wrap a deep-learning backend; `fit_and_score` returns
/// the test accuracy as a percentage in `[0, 100]`.
pub trait TrainingBackend {
    fn fit_and_score(
        &mut self,
        graph: &ModelGraph,
        dataset: &Dataset,
        config: &TrainingConfig,
    ) -> Result<f64>;
}

/// Score of one evaluated candidate.
///
/// Always two fields, for success and failure alike; a failed training run
/// is reported as the worst case rather than with a different result
/// shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Total trainable parameter count of the candidate.
    pub parameter_count: u64,
    /// Test accuracy percentage in `[0, 100]`.
    pub accuracy: f64,
}

impl EvaluationResult {
    /// The sentinel score a failed candidate receives.
    pub fn worst() -> Self {
        EvaluationResult { parameter_count: u64::MAX, accuracy: 0.0 }
    }

    /// True when this is the failure sentinel.
    pub fn is_worst(&self) -> bool {
        self.parameter_count == u64::MAX && self.accuracy == 0.0
    }
}

/// The root block of one candidate network.
pub trait BlockArchitecture: Block {
    /// Number of output classes this architecture must produce.
    fn class_count(&self) -> usize;

    /// Flatten the tree into its backend-neutral executable description.
    fn model_graph(&self) -> ModelGraph {
        let mut units = Vec::new();
        self.collect_units(&mut units);
        ModelGraph::new(self.input_shape().clone(), units)
    }

    /// Mutate one node and re-validate the whole tree.
    fn mutate(&mut self, rng: &mut StdRng, verbose: bool) -> Result<MutationEvent>
    where
        Self: Sized,
    {
        mutate_tree(self, rng, verbose)
    }

    /// Build, train and score this candidate.
    ///
    /// On a backend failure the error is logged and the candidate is given
    /// the worst-case sentinel score so the surrounding search loop can
    /// keep going.
    fn evaluate(
        &self,
        backend: &mut dyn TrainingBackend,
        dataset: &Dataset,
        config: &TrainingConfig,
    ) -> EvaluationResult {
        let graph = self.model_graph();
        let parameter_count = graph.parameter_count();
        match backend.fit_and_score(&graph, dataset, config) {
            Ok(accuracy) => EvaluationResult { parameter_count, accuracy },
            Err(err) => {
                tracing::warn!(error = %err, "training failed, scoring candidate as worst case");
                EvaluationResult::worst()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architectures::ClassificationArchitecture;
    use crate::{BlocknasError, Shape};
    use rand::SeedableRng;

    struct StubBackend {
        accuracy: f64,
    }

    impl TrainingBackend for StubBackend {
        fn fit_and_score(
            &mut self,
            _graph: &ModelGraph,
            _dataset: &Dataset,
            _config: &TrainingConfig,
        ) -> Result<f64> {
            Ok(self.accuracy)
        }
    }

    struct FailingBackend;

    impl TrainingBackend for FailingBackend {
        fn fit_and_score(
            &mut self,
            _graph: &ModelGraph,
            _dataset: &Dataset,
            _config: &TrainingConfig,
        ) -> Result<f64> {
            Err(BlocknasError::Training("model diverged".to_string()))
        }
    }

    fn arch() -> ClassificationArchitecture {
        let mut rng = StdRng::seed_from_u64(0);
        ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap()
    }

    #[test]
    fn test_evaluate_success() {
        let arch = arch();
        let mut backend = StubBackend { accuracy: 91.5 };
        let result = arch.evaluate(&mut backend, &Dataset::default(), &TrainingConfig::default());
        assert_eq!(result.accuracy, 91.5);
        assert_eq!(result.parameter_count, arch.model_graph().parameter_count());
        assert!(!result.is_worst());
    }

    #[test]
    fn test_evaluate_failure_yields_sentinel() {
        let arch = arch();
        let result =
            arch.evaluate(&mut FailingBackend, &Dataset::default(), &TrainingConfig::default());
        assert!(result.is_worst());
    }

    #[test]
    fn test_training_config_default_passthrough_strings() {
        let config = TrainingConfig::default();
        assert_eq!(config.optimizer, "adam");
        assert_eq!(config.metrics, vec!["accuracy".to_string()]);
    }
}
