//! Generic image-classification search space.
//!
//! Three templates: [`ClassificationBlock`] is the classifier head every
//! architecture in the crate ends with (flatten, an optional dense/dropout
//! stack, and a softmax output sized by the class count),
//! [`FeatureExtractionBlock`] is an unopinionated convolutional stage, and
//! [`ClassificationArchitecture`] strings random feature stages in front of
//! one head.
//!
//! # Examples
//!
//! ```
//! use blocknas::architectures::ClassificationArchitecture;
//! use blocknas::{Block, BlockArchitecture, Shape};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
//! assert_eq!(arch.output_shape(), Shape::from([10]));
//! ```

use crate::architecture::BlockArchitecture;
use crate::block::{boxed, impl_block_via_composite, Block, BlockBody, Composite};
use crate::layer_block::LayerBlock;
use crate::shape::Shape;
use crate::Result;
use rand::rngs::StdRng;
use rand::Rng;

use super::residual::ResidualBlock;
use super::shufflenet::ShuffleNetBlock;

/// Sub-block vocabulary of the classifier head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSubBlock {
    HiddenDense,
    Dropout,
}

impl ClassificationSubBlock {
    const ALL: [ClassificationSubBlock; 2] = [Self::HiddenDense, Self::Dropout];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// The classifier head: flatten, up to `MAX_SUB_BLOCKS` dense/dropout
/// layers, then a softmax output dense sized by the class count.
pub struct ClassificationBlock {
    body: BlockBody,
    class_count: usize,
}

impl ClassificationBlock {
    pub const MAX_SUB_BLOCKS: usize = 2;

    pub fn new(input_shape: &Shape, class_count: usize, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            ClassificationSubBlock::sample,
            |shape, _rng| Ok(vec![boxed(LayerBlock::flatten(shape)?)]),
            |shape, tag, rng| match tag {
                ClassificationSubBlock::HiddenDense => {
                    Ok(vec![boxed(LayerBlock::random_hidden_dense(shape, rng)?)])
                }
                ClassificationSubBlock::Dropout => {
                    Ok(vec![boxed(LayerBlock::random_dropout(shape, rng)?)])
                }
            },
            |shape, _rng| Ok(vec![boxed(LayerBlock::output_dense(shape, class_count)?)]),
        )?;
        let mut block = ClassificationBlock { body, class_count };
        block.validate(true)?;
        Ok(block)
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }
}

impl Composite for ClassificationBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "classification"
    }
}

impl_block_via_composite!(ClassificationBlock);

/// Sub-block vocabulary of a feature-extraction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSubBlock {
    Conv2D,
    DepthwiseConv2D,
    MaxPool2D,
    Residual,
}

impl FeatureSubBlock {
    const ALL: [FeatureSubBlock; 4] =
        [Self::Conv2D, Self::DepthwiseConv2D, Self::MaxPool2D, Self::Residual];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// A convolutional feature stage: one leading convolution followed by a
/// random mix of convolutions, pools and residual groups.
pub struct FeatureExtractionBlock {
    body: BlockBody,
}

impl FeatureExtractionBlock {
    pub const MAX_SUB_BLOCKS: usize = 3;

    pub fn new(input_shape: &Shape, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            FeatureSubBlock::sample,
            |shape, rng| Ok(vec![boxed(LayerBlock::random_conv2d(shape, rng)?)]),
            |shape, tag, rng| match tag {
                FeatureSubBlock::Conv2D => {
                    Ok(vec![boxed(LayerBlock::random_conv2d(shape, rng)?)])
                }
                FeatureSubBlock::DepthwiseConv2D => {
                    Ok(vec![boxed(LayerBlock::random_depthwise_conv2d(shape, rng)?)])
                }
                FeatureSubBlock::MaxPool2D => {
                    Ok(vec![boxed(LayerBlock::random_max_pool(shape, rng)?)])
                }
                FeatureSubBlock::Residual => Ok(vec![boxed(ResidualBlock::new(shape, rng)?)]),
            },
            |_shape, _rng| Ok(vec![]),
        )?;
        let mut block = FeatureExtractionBlock { body };
        block.validate(true)?;
        Ok(block)
    }
}

impl Composite for FeatureExtractionBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "feature_extraction"
    }
}

impl_block_via_composite!(FeatureExtractionBlock);

/// Middle-stage vocabulary of the generic architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationStage {
    FeatureExtraction,
    ShuffleNet,
}

impl ClassificationStage {
    const ALL: [ClassificationStage; 2] = [Self::FeatureExtraction, Self::ShuffleNet];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// The generic classifier: random feature stages in front of exactly one
/// classifier head. Terminal by construction, and checked to stay so.
pub struct ClassificationArchitecture {
    body: BlockBody,
    class_count: usize,
}

impl ClassificationArchitecture {
    pub const MAX_SUB_BLOCKS: usize = 5;

    pub fn new(input_shape: Shape, class_count: usize, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape,
            Self::MAX_SUB_BLOCKS,
            rng,
            ClassificationStage::sample,
            |_shape, _rng| Ok(vec![]),
            |shape, stage, rng| match stage {
                ClassificationStage::FeatureExtraction => {
                    Ok(vec![boxed(FeatureExtractionBlock::new(shape, rng)?)])
                }
                ClassificationStage::ShuffleNet => {
                    Ok(vec![boxed(ShuffleNetBlock::new(shape, rng)?)])
                }
            },
            |shape, rng| Ok(vec![boxed(ClassificationBlock::new(shape, class_count, rng)?)]),
        )?;
        let mut arch = ClassificationArchitecture { body, class_count };
        arch.validate(true)?;
        Ok(arch)
    }
}

impl Composite for ClassificationArchitecture {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "classification_architecture"
    }

    /// The tree is terminal only when it still ends in a classifier head.
    fn check(&self) -> bool {
        self.body
            .output_blocks
            .last()
            .map_or(false, |b| b.role() == "classification")
    }
}

impl_block_via_composite!(ClassificationArchitecture);

impl BlockArchitecture for ClassificationArchitecture {
    fn class_count(&self) -> usize {
        self.class_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_head_starts_flat_and_ends_in_class_count() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let head = ClassificationBlock::new(&Shape::from([7, 7, 32]), 10, &mut rng).unwrap();
            assert_eq!(head.body.input_blocks[0].role(), "flatten");
            assert_eq!(head.output_shape(), Shape::from([10]));
        }
    }

    #[test]
    fn test_feature_stage_keeps_rank_three() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let stage = FeatureExtractionBlock::new(&Shape::from([28, 28, 1]), &mut rng).unwrap();
            assert_eq!(stage.output_shape().rank(), 3);
            assert!(stage.output_shape().is_positive());
        }
    }

    #[test]
    fn test_architecture_ends_in_classifier() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let arch =
                ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
            assert!(arch.check());
            assert_eq!(arch.output_shape(), Shape::from([10]));
        }
    }

    #[test]
    fn test_same_seed_same_architecture() {
        let build = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng)
                .unwrap()
                .model_graph()
        };
        assert_eq!(build(42), build(42));
    }

    #[test]
    fn test_describe_mentions_head() {
        let mut rng = StdRng::seed_from_u64(0);
        let arch = ClassificationArchitecture::new(Shape::from([28, 28, 1]), 10, &mut rng).unwrap();
        let mut text = String::new();
        arch.describe(0, &mut text);
        assert!(text.contains("classification"));
    }
}
