//! Random-search demo over the MNIST-shaped classification space.
//!
//! Generates a small population of candidate architectures, applies a few
//! rounds of mutation, scores each candidate with a stand-in backend and
//! prints the best model summary. Swap `HeuristicBackend` for a real
//! training backend to score candidates on actual data.
//!
//! Run with `cargo run --example mnist_search`.

use anyhow::Result;
use blocknas::architectures::ClassificationArchitecture;
use blocknas::{
    BlockArchitecture, Dataset, EvaluationResult, ModelGraph, Shape, TrainingBackend,
    TrainingConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const POPULATION: usize = 12;
const MUTATIONS_PER_CANDIDATE: usize = 5;

/// Stand-in backend: scores a candidate by a crude capacity heuristic
/// instead of training. Deterministic, so the demo is reproducible.
struct HeuristicBackend;

impl TrainingBackend for HeuristicBackend {
    fn fit_and_score(
        &mut self,
        graph: &ModelGraph,
        _dataset: &Dataset,
        _config: &TrainingConfig,
    ) -> blocknas::Result<f64> {
        let params = graph.parameter_count() as f64;
        let depth = graph.len() as f64;
        // Reward depth, penalize parameter bloat past ~100k.
        let score = 60.0 + 4.0 * depth - (params / 100_000.0) * 10.0;
        Ok(score.clamp(0.0, 100.0))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut rng = StdRng::seed_from_u64(2024);
    let dataset = Dataset::default();
    let config = TrainingConfig::default();
    let mut backend = HeuristicBackend;

    let mut best: Option<(EvaluationResult, ModelGraph)> = None;

    for candidate in 0..POPULATION {
        let mut arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng)?;
        for _ in 0..MUTATIONS_PER_CANDIDATE {
            arch.mutate(&mut rng, true)?;
        }

        let result = arch.evaluate(&mut backend, &dataset, &config);
        println!(
            "candidate {:>2}: accuracy {:6.2}%  params {:>8}",
            candidate, result.accuracy, result.parameter_count
        );

        let improved = best
            .as_ref()
            .map(|(b, _)| result.accuracy > b.accuracy)
            .unwrap_or(true);
        if improved {
            best = Some((result, arch.model_graph()));
        }
    }

    let (result, graph) = best.expect("population is non-empty");
    println!();
    println!(
        "best candidate: accuracy {:.2}% with {} parameters",
        result.accuracy, result.parameter_count
    );
    println!("{}", graph);

    Ok(())
}
