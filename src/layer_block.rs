//! LayerBlock - a single layer wrapped as a tree node.
//!
//! `LayerBlock` lets the tree-generation machinery treat "place one
//! specific layer here" uniformly with "place a composite sub-block here".
//! Its constructors are the vocabulary the templates draw from: each takes
//! the incoming shape and the injected random source and produces a layer
//! of the requested kind with randomized free parameters inside the kind's
//! mutation bounds.
//!
//! # Examples
//!
//! ```
//! use blocknas::layer_block::LayerBlock;
//! use blocknas::block::Block;
//! use blocknas::Shape;
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let block = LayerBlock::random_conv2d(&Shape::from([28, 28, 1]), &mut rng).unwrap();
//! assert_eq!(block.role(), "conv2d");
//! assert_eq!(block.node_count(), 1);
//! ```

use crate::block::{Block, MutationEvent};
use crate::layer::{
    Activation, Conv2DParams, DenseParams, DenseRole, DepthwiseConv2DParams, DropoutParams, Layer,
    LayerKind, MaxPool2DParams, Padding, ReshapeParams, MAX_DENSE_UNITS, MAX_DROPOUT_RATE,
};
use crate::model::GraphUnit;
use crate::shape::Shape;
use crate::{BlocknasError, Result};
use rand::rngs::StdRng;
use rand::Rng;
use std::any::Any;

/// A Block whose entire content is exactly one [`Layer`].
pub struct LayerBlock {
    layer: Layer,
    role: &'static str,
}

fn require_rank(input: &Shape, rank: usize, block: &'static str) -> Result<()> {
    if input.rank() != rank {
        return Err(BlocknasError::GenerationConstraint {
            block,
            reason: format!("requires rank-{} input, got {}", rank, input),
        });
    }
    Ok(())
}

impl LayerBlock {
    /// Wrap an already-built layer under a role tag.
    pub fn new(layer: Layer, role: &'static str) -> Self {
        LayerBlock { layer, role }
    }

    /// The wrapped layer.
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Mutable access to the wrapped layer, for block-level repairs.
    pub fn layer_mut(&mut self) -> &mut Layer {
        &mut self.layer
    }

    /// A convolution with randomized filters, kernel, stride and padding.
    pub fn random_conv2d(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        require_rank(input, 3, "conv2d")?;
        let kernel = [1, 3, 5, 7][rng.gen_range(0..4)];
        let stride = if rng.gen_bool(0.2) { 2 } else { 1 };
        let layer = Layer::new(
            LayerKind::Conv2D(Conv2DParams {
                filters: rng.gen_range(8..=64),
                kernel_size: (kernel, kernel),
                strides: (stride, stride),
                padding: if rng.gen_bool(0.5) { Padding::Same } else { Padding::Valid },
                dilation_rate: (1, 1),
                activation: Activation::ReLU,
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "conv2d"))
    }

    /// A 1x1 convolution with a randomized filter count.
    pub fn pointwise_conv2d(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        require_rank(input, 3, "pointwise_conv2d")?;
        let layer = Layer::new(
            LayerKind::Conv2D(Conv2DParams {
                filters: rng.gen_range(8..=64),
                kernel_size: (1, 1),
                strides: (1, 1),
                padding: Padding::Same,
                dilation_rate: (1, 1),
                activation: Activation::ReLU,
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "pointwise_conv2d"))
    }

    /// A shape-preserving convolution: same padding, unit stride and a
    /// filter count equal to the input channel count.
    pub fn identity_conv2d(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        require_rank(input, 3, "identity_conv2d")?;
        let kernel = [1, 3, 5][rng.gen_range(0..3)];
        let layer = Layer::new(
            LayerKind::Conv2D(Conv2DParams {
                filters: input.channels(),
                kernel_size: (kernel, kernel),
                strides: (1, 1),
                padding: Padding::Same,
                dilation_rate: (1, 1),
                activation: Activation::ReLU,
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "identity_conv2d"))
    }

    /// A depthwise convolution with a randomized kernel.
    pub fn random_depthwise_conv2d(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        require_rank(input, 3, "depthwise_conv2d")?;
        let kernel = [3, 5][rng.gen_range(0..2)];
        let layer = Layer::new(
            LayerKind::DepthwiseConv2D(DepthwiseConv2DParams {
                kernel_size: (kernel, kernel),
                strides: (1, 1),
                padding: Padding::Same,
                activation: Activation::ReLU,
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "depthwise_conv2d"))
    }

    /// A max pool with a randomized window; stride follows the window.
    pub fn random_max_pool(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        require_rank(input, 3, "max_pool2d")?;
        let pool = [2, 3][rng.gen_range(0..2)];
        let layer = Layer::new(
            LayerKind::MaxPool2D(MaxPool2DParams {
                pool_size: (pool, pool),
                strides: (pool, pool),
                padding: if rng.gen_bool(0.5) { Padding::Same } else { Padding::Valid },
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "max_pool2d"))
    }

    /// A global average pool collapsing spatial dims to `(channels,)`.
    pub fn global_average_pool(input: &Shape) -> Result<Self> {
        require_rank(input, 3, "global_average_pool2d")?;
        let layer = Layer::new(LayerKind::GlobalAveragePool2D, input.clone())?;
        Ok(LayerBlock::new(layer, "global_average_pool2d"))
    }

    /// A flatten to rank 1.
    pub fn flatten(input: &Shape) -> Result<Self> {
        let layer = Layer::new(LayerKind::Flatten, input.clone())?;
        Ok(LayerBlock::new(layer, "flatten"))
    }

    /// A reshape to a random factorization of the input magnitude.
    pub fn random_reshape(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        let target_shape = input.random_refactor(rng);
        let layer = Layer::new(
            LayerKind::Reshape(ReshapeParams { target_shape }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "reshape"))
    }

    /// A hidden dense layer with a randomized unit count.
    pub fn random_hidden_dense(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        require_rank(input, 1, "hidden_dense")?;
        let layer = Layer::new(
            LayerKind::Dense(DenseParams {
                units: rng.gen_range(16..=MAX_DENSE_UNITS),
                activation: Activation::ReLU,
                role: DenseRole::Hidden,
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "hidden_dense"))
    }

    /// The classifier head: a dense layer sized by the class count.
    pub fn output_dense(input: &Shape, class_count: usize) -> Result<Self> {
        require_rank(input, 1, "output_dense")?;
        if class_count == 0 {
            return Err(BlocknasError::GenerationConstraint {
                block: "output_dense",
                reason: "class count must be positive".to_string(),
            });
        }
        let layer = Layer::new(
            LayerKind::Dense(DenseParams {
                units: class_count,
                activation: Activation::Softmax,
                role: DenseRole::Output,
            }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "output_dense"))
    }

    /// A dropout with a randomized rate.
    pub fn random_dropout(input: &Shape, rng: &mut StdRng) -> Result<Self> {
        let layer = Layer::new(
            LayerKind::Dropout(DropoutParams { rate: rng.gen_range(0.05..=MAX_DROPOUT_RATE) }),
            input.clone(),
        )?;
        Ok(LayerBlock::new(layer, "dropout"))
    }
}

impl Block for LayerBlock {
    fn role(&self) -> &'static str {
        self.role
    }

    fn input_shape(&self) -> &Shape {
        self.layer.input_shape()
    }

    fn output_shape(&self) -> Shape {
        self.layer.output_shape().clone()
    }

    fn propagate_shape(&mut self, input: Shape) -> Result<()> {
        self.layer.set_input_shape(input);
        Ok(())
    }

    fn validate(&mut self, repair: bool) -> Result<bool> {
        self.layer.validate(repair)
    }

    fn node_count(&self) -> usize {
        1
    }

    fn mutate_node(&mut self, index: usize, rng: &mut StdRng) -> Result<MutationEvent> {
        debug_assert_eq!(index, 0);
        let node = self.layer.to_string();
        let outcome = self.layer.mutate(rng);
        Ok(MutationEvent { node, outcome })
    }

    fn collect_units(&self, out: &mut Vec<GraphUnit>) {
        out.push(self.layer.to_graph_unit());
    }

    fn describe(&self, indent: usize, out: &mut String) {
        out.push_str(&format!("{}{}\n", "  ".repeat(indent), self.layer));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn test_random_conv_is_valid() {
        let mut rng = rng();
        for _ in 0..50 {
            let mut block = LayerBlock::random_conv2d(&Shape::from([28, 28, 1]), &mut rng).unwrap();
            assert!(block.validate(false).unwrap());
            assert!(block.output_shape().is_positive());
        }
    }

    #[test]
    fn test_conv_rejects_rank_one_input() {
        let mut rng = rng();
        let result = LayerBlock::random_conv2d(&Shape::from([784]), &mut rng);
        assert!(matches!(
            result,
            Err(BlocknasError::GenerationConstraint { block: "conv2d", .. })
        ));
    }

    #[test]
    fn test_identity_conv_preserves_shape() {
        let mut rng = rng();
        for _ in 0..20 {
            let block =
                LayerBlock::identity_conv2d(&Shape::from([14, 14, 8]), &mut rng).unwrap();
            assert_eq!(block.output_shape(), Shape::from([14, 14, 8]));
        }
    }

    #[test]
    fn test_output_dense_sized_by_class_count() {
        let block = LayerBlock::output_dense(&Shape::from([128]), 10).unwrap();
        assert_eq!(block.output_shape(), Shape::from([10]));
    }

    #[test]
    fn test_output_dense_rejects_zero_classes() {
        let result = LayerBlock::output_dense(&Shape::from([128]), 0);
        assert!(matches!(result, Err(BlocknasError::GenerationConstraint { .. })));
    }

    #[test]
    fn test_mutate_node_reports_event() {
        let mut rng = rng();
        let mut block = LayerBlock::random_conv2d(&Shape::from([28, 28, 1]), &mut rng).unwrap();
        let event = block.mutate_node(0, &mut rng).unwrap();
        assert!(event.node.starts_with("Conv2D"));
        assert!(event.outcome.is_some());
    }

    #[test]
    fn test_random_reshape_preserves_magnitude() {
        let mut rng = rng();
        for _ in 0..20 {
            let block = LayerBlock::random_reshape(&Shape::from([12, 12, 4]), &mut rng).unwrap();
            assert_eq!(block.output_shape().magnitude(), 576);
        }
    }

    #[test]
    fn test_flatten_collects_single_unit() {
        let block = LayerBlock::flatten(&Shape::from([4, 4, 2])).unwrap();
        let mut units = Vec::new();
        block.collect_units(&mut units);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].output_shape, Shape::from([32]));
    }
}
