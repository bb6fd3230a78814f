//! Tensor shapes and shape arithmetic.
//!
//! A [`Shape`] is an ordered tuple of dimensions describing the tensor a
//! layer consumes or produces. Shapes are threaded through an architecture
//! tree from the root input down to every leaf layer, and the framework's
//! central structural invariant is that the output shape of each child in a
//! block's flattened child sequence equals the input shape of the next.
//!
//! # Examples
//!
//! ```
//! use blocknas::Shape;
//!
//! let image = Shape::from([28, 28, 1]);
//! assert_eq!(image.rank(), 3);
//! assert_eq!(image.magnitude(), 784);
//! assert_eq!(image.to_string(), "(28, 28, 1)");
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered tuple of tensor dimensions.
///
/// All dimensions are expected to be positive once a tree has been
/// validated; intermediate states (mid-repair) may briefly hold
/// non-positive placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a shape from explicit dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Dimensions as a slice.
    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Dimension at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= rank()`.
    #[inline]
    pub fn dim(&self, index: usize) -> usize {
        self.0[index]
    }

    /// Product of all dimensions.
    ///
    /// This is the total element count of the tensor and the quantity a
    /// reshape must preserve.
    ///
    /// # Examples
    ///
    /// ```
    /// use blocknas::Shape;
    ///
    /// assert_eq!(Shape::from([2, 4, 6]).magnitude(), 48);
    /// assert_eq!(Shape::from([10]).magnitude(), 10);
    /// ```
    pub fn magnitude(&self) -> usize {
        self.0.iter().product()
    }

    /// True if every dimension is strictly positive.
    pub fn is_positive(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|&d| d > 0)
    }

    /// Last dimension, conventionally the channel count for rank-3 shapes.
    ///
    /// # Panics
    ///
    /// Panics on a rank-0 shape.
    #[inline]
    pub fn channels(&self) -> usize {
        *self.0.last().expect("channels() on empty shape")
    }

    /// Produce a random shape with the same magnitude as `self`.
    ///
    /// Picks a rank between 1 and 3 and splits the magnitude into random
    /// integer factors. Used to mutate reshape targets without breaking the
    /// element-count invariant.
    ///
    /// # Examples
    ///
    /// ```
    /// use blocknas::Shape;
    /// use rand::SeedableRng;
    ///
    /// let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    /// let shape = Shape::from([4, 6, 2]);
    /// let refactored = shape.random_refactor(&mut rng);
    /// assert_eq!(refactored.magnitude(), 48);
    /// ```
    pub fn random_refactor<R: Rng>(&self, rng: &mut R) -> Shape {
        let magnitude = self.magnitude();
        if magnitude == 0 {
            return self.clone();
        }
        let rank = rng.gen_range(1..=3);
        let mut dims = Vec::with_capacity(rank);
        let mut remainder = magnitude;
        for _ in 0..rank - 1 {
            let divisors: Vec<usize> = (1..=remainder).filter(|d| remainder % d == 0).collect();
            let pick = divisors[rng.gen_range(0..divisors.len())];
            dims.push(pick);
            remainder /= pick;
        }
        dims.push(remainder);
        Shape(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}
