//! Blocknas - Hierarchical Neural Architecture Search Framework
//!
//! Blocknas is a Rust framework for evolving neural network architectures
//! from **composable blocks**. Candidate networks are trees: composite
//! blocks own ordered child sequences, leaves wrap single layers, and the
//! root is an architecture that flattens into a backend-neutral model
//! description for an external training backend to score.
//!
//! # Key Characteristics
//!
//! - Closed, typed layer and sub-block vocabularies per template
//! - Deterministic generation and mutation under a seedable RNG
//! - Self-repairing shape propagation with a bounded repair loop
//! - Backend-neutral model graphs with serde persistence
//!
//! # Architecture
//!
//! The framework is built around several core components:
//!
//! - **Shape & Mutation Primitives**: tensor shapes and bounded parameter
//!   perturbation
//! - **Layer**: typed layer parameters with validate / repair / mutate and
//!   output-shape inference
//! - **Block System**: the recursive composite tree with three-phase
//!   generation hooks
//! - **Architectures**: concrete search-space templates (classification,
//!   EffNet, ZFNet, ShuffleNet, residual, squeeze-expansion)
//!
//! # Examples
//!
//! ## Generating and mutating a candidate
//!
//! ```
//! use blocknas::architectures::ClassificationArchitecture;
//! use blocknas::{Block, BlockArchitecture, Shape};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let mut arch =
//!     ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
//! assert_eq!(arch.output_shape(), Shape::from([10]));
//!
//! arch.mutate(&mut rng, false).unwrap();
//! assert_eq!(arch.output_shape(), Shape::from([10]));
//! ```
//!
//! ## Flattening to a model graph
//!
//! ```
//! use blocknas::architectures::ClassificationArchitecture;
//! use blocknas::{BlockArchitecture, Shape};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
//! let graph = arch.model_graph();
//! assert_eq!(graph.output_shape(), Shape::from([10]));
//! let json = graph.to_json().unwrap();
//! assert!(json.contains("Dense"));
//! ```
//!
//! # Determinism
//!
//! All randomness flows through an injected `StdRng`; the same seed yields
//! the same architecture, the same mutation trace and the same model
//! graph. Evaluation is the only boundary that touches the outside world.

pub mod architecture;
pub mod architectures;
pub mod block;
pub mod error;
pub mod layer;
pub mod layer_block;
pub mod model;
pub mod mutation;
pub mod shape;

pub use error::{BlocknasError, Result};
pub use shape::Shape;

pub use block::{boxed, mutate_tree, Block, BlockBody, Composite, MutationEvent};
pub use layer::{
    Activation, DenseRole, Layer, LayerKind, MutationOutcome, Padding, MAX_REPAIR_ITERATIONS,
};
pub use layer_block::LayerBlock;
pub use mutation::MutationOp;

pub use architecture::{
    BlockArchitecture, Dataset, EvaluationResult, TrainingBackend, TrainingConfig,
};
pub use model::{GraphUnit, LayerSpec, ModelGraph};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework name
pub const NAME: &str = "Blocknas";

/// Get version string
pub fn version() -> String {
    format!("{} v{}", NAME, VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(ver.contains("Blocknas"));
        assert!(ver.contains("0.3.0"));
    }

    #[test]
    fn test_re_exports() {
        let shape = Shape::from([28, 28, 1]);
        assert_eq!(shape.magnitude(), 784);
        let _result: Result<()> = Ok(());
        assert!(MAX_REPAIR_ITERATIONS > 0);
    }
}
