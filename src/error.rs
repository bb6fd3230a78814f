//! Error types for the blocknas framework.
//!
//! This module provides a unified error type for all operations in the
//! blocknas framework, using the `thiserror` crate for ergonomic error
//! handling.

use thiserror::Error;

/// The main error type for blocknas operations.
///
/// This enum represents all possible error conditions that can occur
/// during architecture generation, validation, mutation and evaluation.
#[derive(Error, Debug)]
pub enum BlocknasError {
    /// A repair loop failed to converge within the iteration bound
    #[error("repair did not converge for {node} after {iterations} iterations")]
    RepairDivergence {
        /// Description of the node that could not be repaired
        node: String,
        /// Number of repair iterations attempted
        iterations: usize,
    },

    /// A generation hook was asked for something it cannot produce
    #[error("generation constraint violated in {block}: {reason}")]
    GenerationConstraint {
        /// Name of the block template whose hook failed
        block: &'static str,
        /// What went wrong
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Adjacent children disagree about the shape flowing between them
    #[error("shape mismatch at {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Where in the tree the mismatch was detected
        context: String,
        /// Shape the downstream child declared
        expected: String,
        /// Shape the upstream child produced
        actual: String,
    },

    /// The external training backend reported a failure
    #[error("training failed: {0}")]
    Training(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error occurred
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// A specialized `Result` type for blocknas operations.
///
/// This is a type alias for `Result<T, BlocknasError>` and is used
/// throughout the blocknas codebase for consistency.
pub type Result<T> = std::result::Result<T, BlocknasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BlocknasError::RepairDivergence {
            node: "MaxPool2D (2, 2)".to_string(),
            iterations: 8,
        };
        assert_eq!(
            err.to_string(),
            "repair did not converge for MaxPool2D (2, 2) after 8 iterations"
        );

        let err = BlocknasError::ShapeMismatch {
            context: "middle_blocks[1]".to_string(),
            expected: "(28, 28, 1)".to_string(),
            actual: "(14, 14, 1)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "shape mismatch at middle_blocks[1]: expected (28, 28, 1), got (14, 14, 1)"
        );
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
