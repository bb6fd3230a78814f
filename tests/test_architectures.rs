//! End-to-end tests over the concrete architecture templates: generation,
//! terminal structure, mutation stability and the evaluate boundary.

use approx::assert_relative_eq;
use blocknas::architectures::{
    ClassificationArchitecture, EffNetArchitecture, SqueezeExpansionArchitecture,
    ZFNetArchitecture,
};
use blocknas::{
    Block, BlockArchitecture, BlocknasError, Dataset, ModelGraph, Result, Shape, TrainingBackend,
    TrainingConfig,
};
use rand::rngs::StdRng;
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
        Err(BlocknasError::Training("out of memory".to_string()))
    }
}

fn assert_graph_chained(graph: &ModelGraph) {
    assert_eq!(graph.units[0].input_shape, graph.input_shape);
    for pair in graph.units.windows(2) {
        assert_eq!(pair[0].output_shape, pair[1].input_shape);
    }
}

#[test]
fn test_classification_mnist_end_to_end() {
    for seed in 0..30 {
        let mut rng = StdRng::seed_from_u64(seed);
        let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
        assert_eq!(arch.output_shape(), Shape::from([10]));
        assert_eq!(arch.class_count(), 10);

        let graph = arch.model_graph();
        assert_graph_chained(&graph);
        assert_eq!(graph.output_shape(), Shape::from([10]));
        assert!(graph.parameter_count() > 0);
    }
}

#[test]
fn test_effnet_generation() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let arch = EffNetArchitecture::new(Shape::from([32, 32, 3]), 10, &mut rng).unwrap();
        assert_eq!(arch.output_shape(), Shape::from([10]));
        assert_graph_chained(&arch.model_graph());
    }
}

#[test]
fn test_zfnet_generation() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let arch = ZFNetArchitecture::new(Shape::from([64, 64, 3]), 100, &mut rng).unwrap();
        assert_eq!(arch.output_shape(), Shape::from([100]));
        assert_graph_chained(&arch.model_graph());
    }
}

#[test]
fn test_squeeze_expansion_generation() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let arch =
            SqueezeExpansionArchitecture::new(Shape::from([32, 32, 3]), 10, &mut rng).unwrap();
        assert_eq!(arch.output_shape(), Shape::from([10]));
        assert_graph_chained(&arch.model_graph());
    }
}

#[test]
fn test_mutation_preserves_terminal_structure() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
    for _ in 0..100 {
        arch.mutate(&mut rng, false).unwrap();
        assert_eq!(arch.output_shape(), Shape::from([10]));
        assert_graph_chained(&arch.model_graph());
    }
}

#[test]
fn test_mutation_eventually_changes_the_graph() {
    let mut rng = StdRng::seed_from_u64(6);
    let mut arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
    let before = arch.model_graph();
    let mut changed = false;
    for _ in 0..50 {
        arch.mutate(&mut rng, false).unwrap();
        if arch.model_graph() != before {
            changed = true;
            break;
        }
    }
    assert!(changed);
}

#[test]
fn test_same_seed_reproduces_architecture() {
    let build = |seed: u64| {
        let mut rng = StdRng::seed_from_u64(seed);
        EffNetArchitecture::new(Shape::from([32, 32, 3]), 10, &mut rng)
            .unwrap()
            .model_graph()
    };
    assert_eq!(build(123), build(123));
}

#[test]
fn test_evaluate_reports_backend_score() {
    let mut rng = StdRng::seed_from_u64(0);
    let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
    let mut backend = StubBackend { accuracy: 87.25 };
    let result = arch.evaluate(&mut backend, &Dataset::default(), &TrainingConfig::default());
    assert_relative_eq!(result.accuracy, 87.25);
    assert_eq!(result.parameter_count, arch.model_graph().parameter_count());
}

#[test]
fn test_evaluate_failure_scores_worst_case() {
    let mut rng = StdRng::seed_from_u64(0);
    let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
    let result = arch.evaluate(&mut FailingBackend, &Dataset::default(), &TrainingConfig::default());
    assert!(result.is_worst());
    assert_eq!(result.parameter_count, u64::MAX);
    assert_relative_eq!(result.accuracy, 0.0);
}

#[test]
fn test_search_loop_selects_best_candidate() {
    // Miniature random-search driver: population, mutate, score, select.
    let mut rng = StdRng::seed_from_u64(9);
    let mut best = f64::MIN;
    for i in 0..10 {
        let mut arch =
            ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
        arch.mutate(&mut rng, false).unwrap();
        let mut backend = StubBackend { accuracy: 50.0 + i as f64 };
        let result = arch.evaluate(&mut backend, &Dataset::default(), &TrainingConfig::default());
        if result.accuracy > best {
            best = result.accuracy;
        }
    }
    assert_relative_eq!(best, 59.0);
}
