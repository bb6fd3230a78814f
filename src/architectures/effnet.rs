//! EffNet-style template: pointwise-led stages of cheap convolutions,
//! globally pooled before the classifier head.

use crate::architecture::BlockArchitecture;
use crate::block::{boxed, impl_block_via_composite, Block, BlockBody, Composite};
use crate::layer_block::LayerBlock;
use crate::shape::Shape;
use crate::Result;
use rand::rngs::StdRng;
use rand::Rng;

use super::classification::ClassificationBlock;

/// Sub-block vocabulary of one EffNet stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffNetSubBlock {
    Conv2D,
    DepthwiseConv2D,
    MaxPool2D,
}

impl EffNetSubBlock {
    const ALL: [EffNetSubBlock; 3] = [Self::Conv2D, Self::DepthwiseConv2D, Self::MaxPool2D];

    fn sample(rng: &mut StdRng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// One EffNet stage: a pointwise bottleneck convolution followed by a
/// random mix of convolutions and pools.
pub struct EffNetBlock {
    body: BlockBody,
}

impl EffNetBlock {
    pub const MAX_SUB_BLOCKS: usize = 3;

    pub fn new(input_shape: &Shape, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape.clone(),
            Self::MAX_SUB_BLOCKS,
            rng,
            EffNetSubBlock::sample,
            |shape, rng| Ok(vec![boxed(LayerBlock::pointwise_conv2d(shape, rng)?)]),
            |shape, tag, rng| match tag {
                EffNetSubBlock::Conv2D => Ok(vec![boxed(LayerBlock::random_conv2d(shape, rng)?)]),
                EffNetSubBlock::DepthwiseConv2D => {
                    Ok(vec![boxed(LayerBlock::random_depthwise_conv2d(shape, rng)?)])
                }
                EffNetSubBlock::MaxPool2D => {
                    Ok(vec![boxed(LayerBlock::random_max_pool(shape, rng)?)])
                }
            },
            |_shape, _rng| Ok(vec![]),
        )?;
        let mut block = EffNetBlock { body };
        block.validate(true)?;
        Ok(block)
    }
}

impl Composite for EffNetBlock {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "effnet"
    }
}

impl_block_via_composite!(EffNetBlock);

/// EffNet-style architecture: a chain of [`EffNetBlock`] stages, a global
/// average pool, and the classifier head.
pub struct EffNetArchitecture {
    body: BlockBody,
    class_count: usize,
}

impl EffNetArchitecture {
    pub const MAX_SUB_BLOCKS: usize = 3;

    pub fn new(input_shape: Shape, class_count: usize, rng: &mut StdRng) -> Result<Self> {
        let body = BlockBody::generate(
            input_shape,
            Self::MAX_SUB_BLOCKS,
            rng,
            |_rng| (),
            |shape, rng| Ok(vec![boxed(EffNetBlock::new(shape, rng)?)]),
            |shape, (), rng| Ok(vec![boxed(EffNetBlock::new(shape, rng)?)]),
            |shape, rng| {
                let pool = LayerBlock::global_average_pool(shape)?;
                let head = ClassificationBlock::new(&pool.output_shape(), class_count, rng)?;
                Ok(vec![boxed(pool), boxed(head)])
            },
        )?;
        let mut arch = EffNetArchitecture { body, class_count };
        arch.validate(true)?;
        Ok(arch)
    }
}

impl Composite for EffNetArchitecture {
    fn body(&self) -> &BlockBody {
        &self.body
    }

    fn body_mut(&mut self) -> &mut BlockBody {
        &mut self.body
    }

    fn tag(&self) -> &'static str {
        "effnet_architecture"
    }

    fn check(&self) -> bool {
        self.body
            .output_blocks
            .last()
            .map_or(false, |b| b.role() == "classification")
    }
}

impl_block_via_composite!(EffNetArchitecture);

impl BlockArchitecture for EffNetArchitecture {
    fn class_count(&self) -> usize {
        self.class_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_stage_starts_pointwise() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let stage = EffNetBlock::new(&Shape::from([32, 32, 3]), &mut rng).unwrap();
            assert_eq!(stage.body.input_blocks[0].role(), "pointwise_conv2d");
            assert_eq!(stage.output_shape().rank(), 3);
        }
    }

    #[test]
    fn test_architecture_pools_before_head() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let arch = EffNetArchitecture::new(Shape::from([32, 32, 3]), 10, &mut rng).unwrap();
            assert_eq!(arch.body.output_blocks[0].role(), "global_average_pool2d");
            assert_eq!(arch.output_shape(), Shape::from([10]));
        }
    }
}
